use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Fixed name the finished recording is offered under
pub const RECORDING_FILENAME: &str = "recording.webm";

/// Where finished recordings are handed to the operator
#[async_trait]
pub trait DownloadTarget: Send {
    async fn offer(&mut self, filename: &str, payload: Bytes) -> Result<PathBuf>;
}

/// Saves downloads into a directory without overwriting earlier files
///
/// Name clashes get a ` (n)` suffix the way browsers do:
/// `recording.webm`, `recording (1).webm`, ...
pub struct DownloadDir {
    dir: PathBuf,
}

impl DownloadDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl DownloadTarget for DownloadDir {
    async fn offer(&mut self, filename: &str, payload: Bytes) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create download directory: {:?}", self.dir))?;

        for attempt in 0u32.. {
            let path = self.dir.join(numbered_name(filename, attempt));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            let mut file = match file {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {:?}", path));
                }
            };

            file.write_all(&payload)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            file.flush()
                .await
                .with_context(|| format!("Failed to flush {:?}", path))?;

            tracing::info!("Saved {} bytes to {:?}", payload.len(), path);
            return Ok(path);
        }

        Err(anyhow::anyhow!("No free file name for {}", filename))
    }
}

fn numbered_name(filename: &str, n: u32) -> String {
    if n == 0 {
        return filename.to_string();
    }
    let path = Path::new(filename);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{} ({}).{}",
            stem.to_string_lossy(),
            n,
            ext.to_string_lossy()
        ),
        _ => format!("{} ({})", filename, n),
    }
}
