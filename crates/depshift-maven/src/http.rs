use crate::error::{FetchError, Result};
use crate::retry::RetryPolicy;
use crate::throttle::Throttle;
use depshift_core::NetworkConfig;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

static PARTIAL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A scratch name next to `destination` no other download shares.
fn partial_path(destination: &Path) -> PathBuf {
    let sequence = PARTIAL_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    destination.with_extension(format!("part.{}.{}", std::process::id(), sequence))
}

/// Throttled, retrying HTTP access shared by the sources and the downloader.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            retry: RetryPolicy::from(config),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn get_text(&self, url: &str, throttle: &Throttle) -> Result<String> {
        self.retry
            .run(url, move || async move {
                throttle.acquire().await;
                debug!(url, host = throttle.name(), "GET");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| FetchError::from_reqwest(e, url))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::from_status(status.as_u16(), url));
                }
                response
                    .text()
                    .await
                    .map_err(|e| FetchError::from_reqwest(e, url))
            })
            .await
    }

    /// `HEAD` request; a missing resource is `Ok(false)`.
    pub async fn probe(&self, url: &str, throttle: &Throttle) -> Result<bool> {
        let outcome = self
            .retry
            .run(url, move || async move {
                throttle.acquire().await;
                let response = self
                    .client
                    .head(url)
                    .send()
                    .await
                    .map_err(|e| FetchError::from_reqwest(e, url))?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(FetchError::from_status(status.as_u16(), url))
                }
            })
            .await;
        match outcome {
            Ok(()) => Ok(true),
            Err(FetchError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Streams the body of `url` into `destination` through a private
    /// `.part` file. Concurrent downloads of one destination do not clash.
    pub async fn download(&self, url: &str, throttle: &Throttle, destination: &Path) -> Result<u64> {
        let partial = partial_path(destination);
        let partial = partial.as_path();
        let written = self
            .retry
            .run(url, move || async move {
                throttle.acquire().await;
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| FetchError::from_reqwest(e, url))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::from_status(status.as_u16(), url));
                }

                let mut file = tokio::fs::File::create(partial).await?;
                let mut body = response.bytes_stream();
                let mut written = 0u64;
                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| FetchError::from_reqwest(e, url))?;
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                file.flush().await?;
                Ok(written)
            })
            .await;

        match written {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(partial, destination).await {
                    let _ = tokio::fs::remove_file(partial).await;
                    // Another writer finished the same archive first.
                    if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
                        return Err(e.into());
                    }
                }
                debug!(url, bytes, path = %destination.display(), "Downloaded");
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(partial).await;
                Err(e)
            }
        }
    }
}
