use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;
use vinsure_pipeline::prelude::*;

mod server;

#[derive(Parser, Debug)]
#[command(
    name = "vinsure",
    version,
    about = "Vehicle-insurance interest training pipeline"
)]
struct Cli {
    /// Pipeline configuration file.
    #[arg(
        long,
        global = true,
        env = "VINSURE_CONFIG",
        default_value = "config/pipeline.toml"
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the training pipeline once.
    Run,
    /// Lists the most recent runs.
    Runs {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Shows the summary of one run.
    Status {
        /// Run identifier (artifact directory name).
        run_id: String,
    },
    /// Predicts interest for one applicant with the deployed model.
    Predict {
        /// Customer record as JSON.
        #[arg(long)]
        record: String,
    },
    /// Serves the training trigger and prediction endpoints over HTTP.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let config = PipelineConfig::load(&cli.config)?;
    match cli.command {
        Commands::Run => {
            let outcome = run_from_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Runs { limit } => {
            let summaries = read_run_summaries(&config.pipeline.artifact_root)?;
            for summary in summaries.into_iter().rev().take(limit) {
                println!("{}", summary_line(&summary));
            }
            Ok(())
        }
        Commands::Status { run_id } => {
            let summaries = read_run_summaries(&config.pipeline.artifact_root)?;
            if let Some(summary) = summaries.into_iter().rev().find(|s| s.run_id == run_id) {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("run {run_id} not found");
            }
            Ok(())
        }
        Commands::Predict { record } => {
            let record: CustomerRecord =
                serde_json::from_str(&record).context("parsing customer record")?;
            let service =
                PredictionService::new(Arc::new(FsModelRegistry::from_config(&config.registry)));
            let prediction = service.predict(&record)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
            Ok(())
        }
        Commands::Serve { addr } => {
            let runtime = Runtime::new().context("starting tokio runtime")?;
            runtime.block_on(server::serve(addr, config))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn summary_line(summary: &RunSummary) -> String {
    let started = summary
        .started_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    let detail = match (&summary.decision, &summary.error) {
        (Some(decision), _) => format!(
            "f1 {:.4} vs {:.4}",
            decision.trained_score, decision.incumbent_score
        ),
        (None, Some(error)) => error.clone(),
        (None, None) => String::new(),
    };
    format!(
        "{} | {} | {} | {}",
        summary.run_id, summary.status, started, detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands_with_default_config() {
        let cli = Cli::try_parse_from(["vinsure", "runs", "--limit", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Runs { limit: 3 }));
        if std::env::var_os("VINSURE_CONFIG").is_none() {
            assert_eq!(cli.config, PathBuf::from("config/pipeline.toml"));
        }

        let cli = Cli::try_parse_from(["vinsure", "status", "10_19_2026_14_03_59"]).unwrap();
        match cli.command {
            Commands::Status { run_id } => assert_eq!(run_id, "10_19_2026_14_03_59"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["vinsure", "run", "--config", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/p.toml"));
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn serve_parses_address_and_rejects_garbage() {
        let cli = Cli::try_parse_from(["vinsure", "serve", "--addr", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Serve { addr } => assert_eq!(addr.port(), 9000),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["vinsure", "serve", "--addr", "nowhere"]).is_err());
        assert!(Cli::try_parse_from(["vinsure", "predict"]).is_err());
    }

    #[test]
    fn summary_line_shows_failure_cause() {
        let summary = RunSummary {
            run_id: "10_19_2026_14_03_59".into(),
            pipeline: "vinsure".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            status: RunStatus::Failed,
            failed_stage: Some(Stage::Ingestion),
            error: Some("schema_mismatch: [ingestion] schema mismatch: missing Vintage".into()),
            decision: None,
            artifact_dir: PathBuf::from("artifact/10_19_2026_14_03_59"),
        };
        let line = summary_line(&summary);
        assert!(line.starts_with("10_19_2026_14_03_59 | failed | "));
        assert!(line.ends_with("missing Vintage"));
    }
}
