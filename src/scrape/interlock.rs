//! Process-wide deduplication of concurrent writes to the same path.
//!
//! A blog can reference the same media URL from several posts in one scrape.
//! Without this guard two download tasks could race on the same temp file,
//! corrupting it and making the final rename fail spuriously. A task that
//! loses the race treats the file as already being handled and returns
//! success.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Mutex-guarded set of paths currently being written.
///
/// Clones share the same set, so one instance handed to every download task
/// interlocks the whole process.
#[derive(Clone, Default)]
pub struct PathInterlock {
    locked: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PathInterlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for writing. Returns `None` without blocking when some
    /// other task already holds it. The claim is released when the returned
    /// guard drops.
    pub fn acquire(&self, path: &Path) -> Option<InterlockGuard> {
        let mut locked = self.locked.lock();
        if !locked.insert(path.to_owned()) {
            return None;
        }
        Some(InterlockGuard {
            locked: Arc::clone(&self.locked),
            path: path.to_owned(),
        })
    }
}

/// Releases the claimed path on drop.
pub struct InterlockGuard {
    locked: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for InterlockGuard {
    fn drop(&mut self) {
        self.locked.lock().remove(&self.path);
    }
}
