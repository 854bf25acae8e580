use log::{debug, error, warn};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Temporary files belonging to one upload. `cleanup` removes each file
/// once; anything still tracked when the value is dropped (e.g. the
/// request was cancelled) is removed synchronously.
#[derive(Debug)]
pub struct Staging {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl Staging {
    pub fn new(dir: impl AsRef<Path>) -> Staging {
        Staging {
            dir: dir.as_ref().to_path_buf(),
            files: Vec::new(),
        }
    }

    /// Creates an empty staged file and returns it for writing.
    pub async fn create(&mut self, extension: &str) -> io::Result<(PathBuf, fs::File)> {
        fs::create_dir_all(&self.dir).await?;
        let name = format!("{}.{}", Uuid::new_v4().simple(), extension);
        let path = self.dir.join(name);
        let file = fs::File::create(&path).await?;
        // Tracked before anything is written so a failed write is cleaned up too.
        self.files.push(path.clone());
        Ok((path, file))
    }

    pub async fn stage(&mut self, extension: &str, data: &[u8]) -> io::Result<PathBuf> {
        let (path, mut file) = self.create(extension).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(path)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub async fn cleanup(&mut self) {
        for path in self.files.drain(..) {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Deleted staged file {:?}", path),
                Err(e) => error!("Error deleting staged file {:?}: {}", path, e),
            }
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        for path in self.files.drain(..) {
            warn!("Staged file {:?} outlived its upload, deleting", path);
            if let Err(e) = std::fs::remove_file(&path) {
                error!("Error deleting staged file {:?}: {}", path, e);
            }
        }
    }
}
