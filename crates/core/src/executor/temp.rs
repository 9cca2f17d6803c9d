//! Scratch files owned by a single run.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A uniquely named scratch file, removed on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct TempResource {
    path: PathBuf,
    released: bool,
}

impl TempResource {
    /// Creates an empty file named `<prefix>_<uuid>.<extension>` in `dir`.
    pub async fn create(dir: &Path, prefix: &str, extension: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4().simple(), extension);
        let path = dir.join(name);

        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "Allocated temp file");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file.
    pub async fn release(mut self) {
        self.released = true;
        remove_quietly(&self.path).await;
    }
}

impl Drop for TempResource {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to remove temp file: {}", e);
            }
        }
    }
}

/// Removes a file, ignoring it if already gone.
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temp file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove temp file: {}", e),
    }
}
