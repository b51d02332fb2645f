//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Directory-backed storage volume standing in for the SD card."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage root {0} is not a readable directory")]
    Unavailable(PathBuf),
    #[error("index document {0} is missing")]
    MissingIndex(PathBuf),
    #[error("invalid file name '{0}'")]
    InvalidName(String),
    #[error("file '{0}' not found")]
    NotFound(String),
    #[error("storage i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Flat file volume rooted at a single directory.
#[derive(Debug, Clone)]
pub struct StorageVolume {
    root: PathBuf,
    index: String,
}

impl StorageVolume {
    /// Open the volume, requiring the root directory and its index document.
    pub fn open(root: impl Into<PathBuf>, index: impl Into<String>) -> Result<Self, StorageError> {
        let root = root.into();
        let index = index.into();
        if !root.is_dir() {
            return Err(StorageError::Unavailable(root));
        }
        let index_path = root.join(&index);
        if !index_path.is_file() {
            return Err(StorageError::MissingIndex(index_path));
        }
        info!(root = %root.display(), index = %index, "storage volume mounted");
        Ok(Self { root, index })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::open(config.root.clone(), config.index.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index)
    }

    /// Cheap liveness probe used by the health task.
    pub fn probe(&self) -> Result<(), StorageError> {
        fs::read_dir(&self.root)
            .map(|_| ())
            .map_err(|_| StorageError::Unavailable(self.root.clone()))
    }

    /// Render `"/<name>,"` for each visible regular file, skipping entries
    /// that would push the rendered size to `limit` or beyond.
    pub fn list_files(&self, limit: usize) -> Result<String, StorageError> {
        let mut names: Vec<String> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        let mut listing = String::new();
        for name in names {
            if listing.len() + name.len() + 2 < limit {
                listing.push('/');
                listing.push_str(&name);
                listing.push(',');
            } else {
                debug!(file = %name, limit, "listing limit reached, entry skipped");
            }
        }
        Ok(listing)
    }

    /// Map a client-supplied name to a path directly under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let trimmed = name.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(StorageError::InvalidName(name.to_owned()));
        }
        let mut components = Path::new(trimmed).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => Ok(self.root.join(part)),
            _ => Err(StorageError::InvalidName(name.to_owned())),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(name.to_owned()));
        }
        fs::remove_file(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "file deleted");
        Ok(())
    }

    /// Open `name` for reading; absent files map to `NotFound`.
    pub fn open_file(&self, name: &str) -> Result<(PathBuf, File), StorageError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(name.to_owned()));
        }
        let file = File::open(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        Ok((path, file))
    }

    /// Create or truncate `name` for an upload.
    pub fn create(&self, name: &str) -> Result<(PathBuf, File), StorageError> {
        let path = self.resolve(name)?;
        let file = File::create(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        Ok((path, file))
    }
}
