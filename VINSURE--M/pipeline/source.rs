//! Raw data sources for the ingestion stage.

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::{
    entity::{config::SourceConfig, RecordSet},
    store::{ensure_parent, temp_sibling},
};

/// Anything that can hand over the full raw table.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Reads the complete raw table.
    fn fetch_raw_table(&self) -> Result<RecordSet>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Builds the source named by configuration.
#[must_use]
pub fn from_config(config: &SourceConfig) -> Box<dyn DataSource> {
    match config {
        SourceConfig::File { path } => Box::new(CsvFileSource::new(path)),
        SourceConfig::Url { url, cache_path } => Box::new(UrlCsvSource::new(url, cache_path)),
    }
}

/// Local CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    /// Creates the source.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DataSource for CsvFileSource {
    fn fetch_raw_table(&self) -> Result<RecordSet> {
        RecordSet::read_csv(&self.path)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Remote CSV, downloaded once into a local cache file.
#[derive(Debug, Clone)]
pub struct UrlCsvSource {
    url: String,
    cache_path: PathBuf,
    timeout: Duration,
}

impl UrlCsvSource {
    /// Creates the source with a 60 second download timeout.
    #[must_use]
    pub fn new(url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            cache_path: cache_path.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the download timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn download(&self) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("building http client")?;
        let body = client
            .get(&self.url)
            .send()
            .with_context(|| format!("downloading {}", self.url))?
            .error_for_status()
            .with_context(|| format!("bad status from {}", self.url))?
            .bytes()
            .with_context(|| format!("reading body of {}", self.url))?;
        persist(&self.cache_path, &body)
    }
}

fn persist(path: &Path, body: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_sibling(path);
    let write = || -> Result<()> {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(body)?;
        file.sync_all()?;
        fs::rename(&tmp, path).with_context(|| format!("moving {} into place", path.display()))
    };
    let written = write();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

impl DataSource for UrlCsvSource {
    fn fetch_raw_table(&self) -> Result<RecordSet> {
        if !self.cache_path.exists() {
            tracing::info!(url = %self.url, cache = %self.cache_path.display(), "downloading raw data");
            self.download()?;
        }
        RecordSet::read_csv(&self.cache_path)
    }

    fn describe(&self) -> String {
        format!("url:{} (cache {})", self.url, self.cache_path.display())
    }
}
