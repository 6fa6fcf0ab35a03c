//! Image builder

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::daemon::{BuildOptions, ContainerRuntime};
use crate::deploy::build_log::{BuildAttempt, BuildLogSink};
use crate::errors::DeployError;

/// Default build descriptor file name
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Outcome of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub tag: String,
    pub log_path: PathBuf,
    pub bytes_logged: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ProgressRecord {
    #[serde(default)]
    error: Option<String>,

    #[serde(default, rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// Splits the build output into newline-delimited records and keeps the
/// messages of those that carry an error.
#[derive(Debug, Default)]
struct RecordScanner {
    pending: Vec<u8>,
    errors: Vec<String>,
}

impl RecordScanner {
    fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.scan_line(&line);
        }
    }

    fn finish(mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        self.scan_line(&rest);
        self.errors
    }

    fn scan_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        let record: ProgressRecord = match serde_json::from_slice(line) {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping unparseable build record: {}", e);
                return;
            }
        };
        let error = record.error.filter(|e| !e.is_empty());
        if let Some(error) = error {
            let message = record
                .error_detail
                .map(|d| d.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(error);
            self.errors.push(message);
        }
    }
}

/// Check that `dir` holds a regular build descriptor file named `dockerfile`
pub async fn check_build_descriptor(dir: &Path, dockerfile: &str) -> Result<(), DeployError> {
    let path = dir.join(dockerfile);
    let meta = fs::metadata(&path).await.map_err(|e| {
        DeployError::PreconditionFailed(format!("{}: {}", path.display(), e))
    })?;

    if meta.is_dir() {
        return Err(DeployError::PreconditionFailed(format!(
            "{} is a directory",
            path.display()
        )));
    }
    if !meta.is_file() {
        return Err(DeployError::PreconditionFailed(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(())
}

/// Package `dir` into an uncompressed tar build context
pub async fn package_context(dir: &Path) -> Result<Bytes, DeployError> {
    let dir = dir.to_path_buf();
    let archive = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &dir)?;
        builder.into_inner()
    })
    .await
    .map_err(|e| DeployError::BuildTransportFailed(format!("context packaging task failed: {}", e)))??;

    Ok(Bytes::from(archive))
}

/// Turns a checkout into a tagged image
pub struct ImageBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    logs: BuildLogSink,
    dockerfile: String,
}

impl ImageBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, logs: BuildLogSink) -> Self {
        Self {
            runtime,
            logs,
            dockerfile: DEFAULT_DOCKERFILE.to_string(),
        }
    }

    /// Use a different build descriptor file name
    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    pub fn logs(&self) -> &BuildLogSink {
        &self.logs
    }

    /// Build `checkout` into the image tagged with the attempt's app id.
    ///
    /// Any record in the build output carrying an error fails the build,
    /// after the whole output has been copied to the log.
    pub async fn build(
        &self,
        checkout: &Path,
        attempt: &BuildAttempt,
    ) -> Result<BuildReport, DeployError> {
        let tag = attempt.app_id.to_string();

        check_build_descriptor(checkout, &self.dockerfile).await?;

        let context = package_context(checkout).await?;
        debug!("Packaged {} ({} bytes)", checkout.display(), context.len());

        let mut log = self.logs.open(attempt).await?;
        let log_path = log.path().to_path_buf();

        info!("Building image {} (log: {})", tag, log_path.display());

        let options = BuildOptions {
            dockerfile: self.dockerfile.clone(),
            tag: tag.clone(),
        };
        let stream = match self.runtime.build_image(context, options).await {
            Ok(stream) => stream,
            Err(e) => {
                let message = e.to_string();
                if let Err(write_err) = log.write(format!("{}\n", message).as_bytes()).await {
                    warn!("Failed to record build error in {}: {}", log_path.display(), write_err);
                }
                if let Err(close_err) = log.close().await {
                    warn!("Failed to close build log {}: {}", log_path.display(), close_err);
                }
                return Err(DeployError::BuildTransportFailed(message));
            }
        };

        let mut scanner = RecordScanner::default();
        let records =
            stream.map(|chunk| chunk.map_err(|e| DeployError::BuildTransportFailed(e.to_string())));
        let bytes_logged = log.copy_and_close(records, |chunk| scanner.feed(chunk)).await?;

        let errors = scanner.finish();
        if !errors.is_empty() {
            for error in &errors {
                warn!("Build of {} reported: {}", tag, error);
            }
            return Err(DeployError::BuildFailed(errors.join("; ")));
        }

        info!("Built image {}", tag);
        Ok(BuildReport {
            tag,
            log_path,
            bytes_logged,
        })
    }
}
