//! Download of provider-hosted results.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, describe_failure};

/// Streams remote media to local files.
#[derive(Clone)]
pub struct Downloader {
    http: Client,
}

impl Downloader {
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }

    /// Download `url` into `dest`, returning the number of bytes written.
    ///
    /// Server errors and throttling are retryable; other non-2xx answers are not.
    /// A partial file is removed on failure.
    pub async fn download(&self, url: &str, dest: &Path) -> ProviderResult<u64> {
        let result = self.fetch_into(url, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn fetch_into(&self, url: &str, dest: &Path) -> ProviderResult<u64> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = format!("{url}: {}", describe_failure(response).await);
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                ProviderError::Download(detail)
            } else {
                ProviderError::DownloadRejected(detail)
            });
        }

        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(ProviderError::Download(format!("{url}: empty body")));
        }

        debug!(url = %url, bytes = written, dest = %dest.display(), "Downloaded remote media");
        Ok(written)
    }
}
