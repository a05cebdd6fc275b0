//! Storage for the single deployed model.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{
    entity::config::RegistryConfig,
    store::{ensure_parent, temp_sibling},
};

/// Opaque serialized model.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelBlob(Vec<u8>);

impl ModelBlob {
    /// Wraps serialized bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serialized bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Blob size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the blob holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ModelBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelBlob").field(&self.0.len()).finish()
    }
}

/// Holds at most one deployed model. Replacement must be atomic: readers see the old blob or
/// the new one, never a mix.
pub trait ModelRegistry: Send + Sync + fmt::Debug {
    /// Whether a model is deployed.
    fn exists(&self) -> Result<bool>;

    /// Retrieves the deployed model.
    fn fetch(&self) -> Result<ModelBlob>;

    /// Replaces the deployed model.
    fn publish(&self, blob: &ModelBlob) -> Result<()>;

    /// Where the model lives, for logs and push artifacts.
    fn location(&self) -> String;
}

/// Registry backed by a directory standing in for an object-store bucket.
#[derive(Debug, Clone)]
pub struct FsModelRegistry {
    bucket: PathBuf,
    key: String,
}

impl FsModelRegistry {
    /// Creates the registry; nothing is touched until first use.
    #[must_use]
    pub fn new(bucket: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Registry described by configuration.
    #[must_use]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(&config.bucket, &config.key)
    }

    /// Path of the deployed blob.
    #[must_use]
    pub fn object_path(&self) -> PathBuf {
        self.bucket.join(&self.key)
    }
}

impl ModelRegistry for FsModelRegistry {
    fn exists(&self) -> Result<bool> {
        let path = self.object_path();
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("probing {}", path.display())),
        }
    }

    fn fetch(&self) -> Result<ModelBlob> {
        let path = self.object_path();
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(ModelBlob::new(bytes))
    }

    fn publish(&self, blob: &ModelBlob) -> Result<()> {
        let path = self.object_path();
        ensure_parent(&path)?;
        let tmp = temp_sibling(&path);
        let written = write_synced(&tmp, blob.as_bytes());
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))
    }

    fn location(&self) -> String {
        self.object_path().display().to_string()
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
