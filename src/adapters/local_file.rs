//! Stripe backend storing one stripe per local file.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::ports::{StripeBackend, StripeResult};
use crate::error::StripeError;

/// Local file opened read-write, created when missing
#[derive(Debug)]
pub struct LocalFileStripe {
    name: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl LocalFileStripe {
    /// Open or create the stripe file.
    ///
    /// `booking` is an allocation hint from the metadata layer; it is only
    /// logged here.
    pub async fn open(path: impl AsRef<Path>, booking: Option<&str>) -> StripeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| map_io(&path, e))?;

        debug!(path = %path.display(), booking = ?booking, "Opened stripe file");

        Ok(Self {
            name: path.display().to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn map_io(path: &Path, err: std::io::Error) -> StripeError {
    match err.kind() {
        ErrorKind::PermissionDenied => StripeError::PermissionDenied(path.display().to_string()),
        ErrorKind::NotFound => StripeError::Unreachable(path.display().to_string()),
        _ => StripeError::Io(err),
    }
}

#[async_trait]
impl StripeBackend for LocalFileStripe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, offset: u64, len: usize) -> StripeResult<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(StripeError::ShortRead {
                    expected: len,
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(Bytes::from(buf))
    }

    async fn write(&self, offset: u64, data: &[u8]) -> StripeResult<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await.map_err(|e| map_io(&self.path, e))?;
        file.flush().await?;
        Ok(())
    }

    async fn truncate(&self, len: u64) -> StripeResult<()> {
        let file = self.file.lock().await;
        file.set_len(len).await.map_err(|e| map_io(&self.path, e))
    }

    async fn stat(&self) -> StripeResult<u64> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }
}
