use crate::error::{BittorrentError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// The file a finished download is written to.
///
/// Opened up front so an unwritable destination fails the download before
/// any peer is contacted.
pub struct OutputFile {
    path: PathBuf,
    file: File,
}

impl OutputFile {
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directories
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                BittorrentError::StorageError(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let file = File::create(&path).await.map_err(|e| {
            BittorrentError::StorageError(format!("Cannot open {}: {}", path.display(), e))
        })?;

        Ok(Self { path, file })
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        self.file.flush().await?;

        info!("Wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }

    /// Close and delete the file, for downloads that never completed.
    pub async fn discard(self) {
        let Self { path, file } = self;
        drop(file);

        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bittorrent-dl-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_creates_parents_and_writes() {
        let dir = scratch_dir("write");
        let path = dir.join("nested").join("out.bin");

        let mut output = OutputFile::create(&path).await.unwrap();
        output.write_all(b"abcdefg").await.unwrap();
        assert_eq!(output.path(), path.as_path());

        assert_eq!(fs::read(&path).await.unwrap(), b"abcdefg");
        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_removes_file() {
        let dir = scratch_dir("discard");
        let path = dir.join("partial.bin");

        let output = OutputFile::create(&path).await.unwrap();
        assert!(path.exists());
        output.discard().await;

        assert!(!path.exists());
        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_destination() {
        let dir = scratch_dir("blocked");
        fs::create_dir_all(&dir).await.unwrap();
        let blocker = dir.join("file");
        fs::write(&blocker, b"x").await.unwrap();

        // a regular file cannot be used as a directory
        let result = OutputFile::create(blocker.join("out.bin")).await;
        assert!(matches!(result, Err(BittorrentError::StorageError(_))));
        fs::remove_dir_all(&dir).await.unwrap();
    }
}
