//! Build log sink
//!
//! One append-only file per build attempt, named
//! `<appId>_docker_<unixTimestamp>_<hexNonce>.log` under the logs root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::deploy::identity::AppId;
use crate::errors::DeployError;

/// One image build attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAttempt {
    pub app_id: AppId,
    pub started_at: DateTime<Utc>,

    /// Eight hex characters keeping concurrent attempts apart
    pub nonce: String,
}

impl BuildAttempt {
    pub fn new(app_id: AppId) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            app_id,
            started_at: Utc::now(),
            nonce,
        }
    }

    /// Log file name for this attempt
    pub fn log_file_name(&self) -> String {
        format!(
            "{}_docker_{}_{}.log",
            self.app_id,
            self.started_at.timestamp(),
            self.nonce
        )
    }
}

/// Creates build logs under a logs root
#[derive(Debug, Clone)]
pub struct BuildLogSink {
    root: PathBuf,
}

impl BuildLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the log of `attempt` is written to
    pub fn path_for(&self, attempt: &BuildAttempt) -> PathBuf {
        self.root.join(attempt.log_file_name())
    }

    /// Create (or truncate) the log for `attempt`, creating the logs root if needed
    pub async fn open(&self, attempt: &BuildAttempt) -> Result<BuildLog, DeployError> {
        let unavailable =
            |e: std::io::Error| DeployError::LogSinkUnavailable(format!("{}: {}", self.root.display(), e));

        fs::create_dir_all(&self.root).await.map_err(unavailable)?;

        let path = self.path_for(attempt);
        let file = fs::File::create(&path).await.map_err(|e| {
            DeployError::LogSinkUnavailable(format!("{}: {}", path.display(), e))
        })?;

        debug!("Opened build log {}", path.display());
        Ok(BuildLog {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }
}

/// Open handle to one build log
#[derive(Debug)]
pub struct BuildLog {
    path: PathBuf,
    writer: BufWriter<fs::File>,
    bytes_written: u64,
}

impl BuildLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append raw bytes
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), DeployError> {
        self.writer.write_all(chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and release the file
    pub async fn close(mut self) -> Result<(), DeployError> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        Ok(())
    }

    /// Copy every chunk of `stream` into the log, then close it.
    ///
    /// `inspect` sees each chunk after it has been written. The log is closed
    /// whether or not the copy completed; a failed write stops the copy but
    /// keeps what was already written.
    pub async fn copy_and_close<S, E, F>(mut self, stream: S, mut inspect: F) -> Result<u64, DeployError>
    where
        S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
        E: Into<DeployError>,
        F: FnMut(&[u8]),
    {
        let mut stream = stream;
        let copied: Result<(), DeployError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(Into::into)?;
                self.write(&chunk).await?;
                inspect(&chunk);
            }
            Ok(())
        }
        .await;

        let written = self.bytes_written;
        let path = self.path.clone();
        let closed = self.close().await;
        if let Err(ref e) = closed {
            warn!("Failed to close build log {}: {}", path.display(), e);
        }

        copied?;
        closed?;
        Ok(written)
    }
}
