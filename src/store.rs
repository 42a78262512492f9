//! Persistent per-blog high-water marks.
//!
//! A single JSON object file mapping blog host to the highest post id ever
//! processed for it. Saves go through a temp-file-plus-rename so a crash
//! mid-write never corrupts the previous state.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("{}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// File-backed map of blog host to highest processed post id.
pub struct MarkStore {
    path: PathBuf,
    marks: BTreeMap<String, i64>,
}

impl MarkStore {
    /// Open the store at `path`, starting empty when the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let marks = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        Ok(Self { path, marks })
    }

    /// Highest processed post id for `blog`, 0 when unknown.
    pub fn highest_id(&self, blog: &str) -> i64 {
        self.marks.get(blog).copied().unwrap_or(0)
    }

    pub fn set_highest_id(&mut self, blog: &str, id: i64) {
        self.marks.insert(blog.to_string(), id);
    }

    /// Persist atomically: write a temp sibling, then rename over the file.
    pub fn save(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.marks).map_err(|source| {
            StoreError::Decode {
                path: self.path.clone(),
                source,
            }
        })?;

        let temp = self.path.with_extension("tmp");
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        fs::write(&temp, bytes).map_err(io_err)?;
        fs::rename(&temp, &self.path).map_err(io_err)?;
        Ok(())
    }

    /// All marks in blog-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.marks.iter().map(|(blog, id)| (blog.as_str(), *id))
    }
}
