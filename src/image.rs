//! Image Provisioner.
//!
//! Ensures a named image exists locally before a container is created from
//! it, either by pulling from a registry or by streaming an archive (HTTP or
//! content-addressed gateway) to a temp file and loading it.

use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::runner::{CommandError, CommandRunner};

const GATEWAY_CAT_URL: &str = "http://localhost:5001/api/v0/cat";
const USER_AGENT: &str = "parity-runner/1.0";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("docker pull failed: {0}")]
    Pull(#[source] CommandError),
    #[error("docker load failed: {0}")]
    Load(#[source] CommandError),
    #[error("malformed archive url {0:?}: {1}")]
    MalformedUrl(String, String),
    #[error("fetch from {url} returned status {status}")]
    NonSuccessStatus { url: String, status: u16 },
    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write archive to {path}: {source}")]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch from {url} cancelled or timed out")]
    FetchAborted { url: String },
}

/// Ensures container images exist locally, by registry pull or archive
/// download+load.
pub struct ImageProvisioner {
    http: reqwest::Client,
    runner: CommandRunner,
}

impl ImageProvisioner {
    pub fn new(runner: CommandRunner) -> Self {
        Self { http: reqwest::Client::new(), runner }
    }

    /// Ensure `image_name` is available locally, fetching `archive_url`
    /// first if one is given. Temp files are removed on every path.
    pub async fn ensure(
        &self,
        image_name: &str,
        archive_url: Option<&str>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        match archive_url {
            None | Some("") => self.pull(image_name, deadline, cancel).await,
            Some(url) => {
                let tmp_path = self.fetch_archive(url, deadline, cancel).await?;
                let result = self.load(&tmp_path, deadline, cancel).await;
                if let Err(err) = tokio::fs::remove_file(&tmp_path).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp_path.display(), %err, "failed to remove image archive temp file");
                    }
                }
                result
            }
        }
    }

    async fn pull(
        &self,
        image_name: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        info!(image = image_name, "pulling image");
        self.runner
            .run_checked(&["pull", image_name], deadline, cancel)
            .await
            .map(|_| ())
            .map_err(ProvisionError::Pull)
    }

    async fn load(
        &self,
        archive_path: &std::path::Path,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let path_str = archive_path.to_string_lossy().into_owned();
        info!(path = %path_str, "loading image archive");
        self.runner
            .run_checked(&["load", "-i", &path_str], deadline, cancel)
            .await
            .map(|_| ())
            .map_err(ProvisionError::Load)
    }

    /// Stream `url` to a uniquely named temp file and return its path on
    /// success. On any failure (non-2xx status, a mid-stream read/write
    /// error, cancellation, or timeout) the temp file is removed before the
    /// error is returned; on success, the caller owns cleanup of the
    /// returned path.
    async fn fetch_archive(
        &self,
        url: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ProvisionError> {
        let tmp_path = std::env::temp_dir().join(format!("image-archive-{}.tar", uuid::Uuid::new_v4()));

        let fetch = async {
            if let Some(cid) = extract_ipfs_cid(url) {
                debug!(cid, "fetching image archive via ipfs gateway");
                let endpoint = format!("{GATEWAY_CAT_URL}?arg={cid}");
                self.stream_to_file(self.http.post(&endpoint), &endpoint, &tmp_path).await
            } else {
                debug!(url, "fetching image archive via http");
                let request = self
                    .http
                    .get(url)
                    .header("User-Agent", USER_AGENT)
                    .header("Accept", "application/octet-stream");
                self.stream_to_file(request, url, &tmp_path).await
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisionError::FetchAborted { url: url.to_string() }),
            result = tokio::time::timeout(deadline, fetch) => {
                match result {
                    Ok(inner) => inner,
                    Err(_elapsed) => Err(ProvisionError::FetchAborted { url: url.to_string() }),
                }
            }
        };

        // Every error path here must still remove the temp file (spec.md
        // §4.2: "temporary files are deleted on all paths"), including a
        // non-2xx status or a mid-stream read/write failure inside
        // `stream_to_file`, not just cancellation/timeout.
        if outcome.is_err() {
            if let Err(err) = tokio::fs::remove_file(&tmp_path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), %err, "failed to remove image archive temp file after fetch failure");
                }
            }
        }

        outcome
    }

    async fn stream_to_file(
        &self,
        request: reqwest::RequestBuilder,
        url_for_errors: &str,
        dest: &std::path::Path,
    ) -> Result<PathBuf, ProvisionError> {
        let response = request
            .send()
            .await
            .map_err(|source| ProvisionError::Http { url: url_for_errors.to_string(), source })?;

        if !response.status().is_success() {
            return Err(ProvisionError::NonSuccessStatus {
                url: url_for_errors.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| ProvisionError::TempFile { path: dest.to_path_buf(), source })?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ProvisionError::Http {
                url: url_for_errors.to_string(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|source| ProvisionError::TempFile { path: dest.to_path_buf(), source })?;
        }
        file.flush()
            .await
            .map_err(|source| ProvisionError::TempFile { path: dest.to_path_buf(), source })?;

        Ok(dest.to_path_buf())
    }
}

/// Extract the CID from an `/ipfs/<cid>` path component, if present.
/// Everything up to `?` is taken as the identifier.
fn extract_ipfs_cid(url: &str) -> Option<String> {
    let marker = "/ipfs/";
    let idx = url.find(marker)?;
    let rest = &url[idx + marker.len()..];
    let cid = rest.split('?').next().unwrap_or(rest);
    if cid.is_empty() {
        return None;
    }
    // A bare `/ipfs/<cid>` path with no scheme is still accepted, since
    // local gateways are often referenced by relative path; this is just
    // diagnostic for the common case of a malformed absolute URL.
    if let Err(err) = Url::parse(url) {
        debug!(url, %err, "ipfs archive url did not parse as an absolute url, treating as relative path");
    }
    Some(cid.to_string())
}
