//! Per-run artifact directory and the cross-run index.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use ndarray::Array2;
use serde::{de::DeserializeOwned, Serialize};

use crate::entity::RunSummary;

/// Directory-name format of a run, e.g. `10_19_2026_14_03_59`.
pub const RUN_ID_FORMAT: &str = "%m_%d_%Y_%H_%M_%S";
/// File under the artifact root listing every run.
pub const RUN_INDEX: &str = "runs.jsonl";

/// Owns `<artifact_root>/<run_id>/` and knows where each stage writes.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    run_id: String,
    run_dir: PathBuf,
}

impl ArtifactStore {
    /// Claims a fresh run directory named after `started`. A numeric suffix is added when a
    /// run from the same second already exists.
    pub fn create(root: impl Into<PathBuf>, started: DateTime<Local>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating artifact root {}", root.display()))?;
        let base = started.format(RUN_ID_FORMAT).to_string();
        let mut attempt = 0_u32;
        loop {
            let run_id = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let run_dir = root.join(&run_id);
            match fs::create_dir(&run_dir) {
                Ok(()) => {
                    return Ok(Self {
                        root,
                        run_id,
                        run_dir,
                    })
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("creating run dir {}", run_dir.display()))
                }
            }
        }
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Artifact root shared by all runs.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// This run's directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Raw table snapshot.
    #[must_use]
    pub fn raw_data_path(&self) -> PathBuf {
        self.run_dir.join("data_ingestion/raw/data.csv")
    }

    /// Training partition.
    #[must_use]
    pub fn train_path(&self) -> PathBuf {
        self.run_dir.join("data_ingestion/ingested/train.csv")
    }

    /// Test partition.
    #[must_use]
    pub fn test_path(&self) -> PathBuf {
        self.run_dir.join("data_ingestion/ingested/test.csv")
    }

    /// Validation report.
    #[must_use]
    pub fn validation_report_path(&self) -> PathBuf {
        self.run_dir.join("data_validation/report.json")
    }

    /// Fitted preprocessor.
    #[must_use]
    pub fn preprocessor_path(&self) -> PathBuf {
        self.run_dir
            .join("data_transformation/transformed_object/preprocessing.json")
    }

    /// Transformed training matrix.
    #[must_use]
    pub fn transformed_train_path(&self) -> PathBuf {
        self.run_dir.join("data_transformation/transformed/train.json")
    }

    /// Transformed test matrix.
    #[must_use]
    pub fn transformed_test_path(&self) -> PathBuf {
        self.run_dir.join("data_transformation/transformed/test.json")
    }

    /// Trained model.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.run_dir.join("model_trainer/trained_model/model.json")
    }
}

/// Creates the parent directory of `path` if needed.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

/// Temporary sibling used while a file is being written.
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serializes `value` as JSON to `path`, replacing any previous file atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_sibling(path);
    let write = || -> Result<()> {
        let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    };
    if let Err(err) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path).with_context(|| format!("moving {} into place", path.display()))
}

/// Reads a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

/// Persists a dense matrix.
pub fn write_array(path: &Path, array: &Array2<f64>) -> Result<()> {
    write_json(path, array)
}

/// Loads a dense matrix written by [`write_array`].
pub fn read_array(path: &Path) -> Result<Array2<f64>> {
    read_json(path)
}

/// Appends one summary line to `<root>/runs.jsonl`.
pub fn append_run_summary(root: &Path, summary: &RunSummary) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
    let path = root.join(RUN_INDEX);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening run index {}", path.display()))?;
    let mut line = serde_json::to_vec(summary)?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(())
}

/// Reads every run summary, oldest first. A missing index means no runs yet.
pub fn read_run_summaries(root: &Path) -> Result<Vec<RunSummary>> {
    let path = root.join(RUN_INDEX);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(&path).with_context(|| format!("opening run index {}", path.display()))?;
    let mut summaries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summaries.push(
            serde_json::from_str(&line)
                .with_context(|| format!("parsing run index {}", path.display()))?,
        );
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RunStatus;
    use chrono::{TimeZone, Utc};
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn run_dirs_are_timestamped_and_unique() {
        let dir = tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
        let first = ArtifactStore::create(dir.path(), started).unwrap();
        let second = ArtifactStore::create(dir.path(), started).unwrap();
        assert_eq!(first.run_id(), "03_07_2026_09_05_01");
        assert_eq!(second.run_id(), "03_07_2026_09_05_01_1");
        assert!(first.model_path().ends_with("model_trainer/trained_model/model.json"));
        assert!(first.run_dir().is_dir() && second.run_dir().is_dir());
    }

    #[test]
    fn arrays_persist_through_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/matrix.json");
        let matrix = array![[1.0, 2.5], [-3.0, 0.0]];
        write_array(&path, &matrix).unwrap();
        assert!(!temp_sibling(&path).exists());
        assert_eq!(read_array(&path).unwrap(), matrix);
    }

    #[test]
    fn run_index_appends_in_order() {
        let dir = tempdir().unwrap();
        assert!(read_run_summaries(dir.path()).unwrap().is_empty());
        for (idx, status) in [RunStatus::Promoted, RunStatus::Rejected].into_iter().enumerate() {
            let now = Utc.timestamp_opt(1_700_000_000 + i64::try_from(idx).unwrap(), 0).unwrap();
            let summary = RunSummary {
                run_id: format!("run-{idx}"),
                pipeline: "vinsure".into(),
                started_at: now,
                finished_at: now,
                status,
                failed_stage: None,
                error: None,
                decision: None,
                artifact_dir: dir.path().join(format!("run-{idx}")),
            };
            append_run_summary(dir.path(), &summary).unwrap();
        }
        let summaries = read_run_summaries(dir.path()).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].status, RunStatus::Rejected);
    }
}
