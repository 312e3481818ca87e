//! Remote document store abstraction.
//!
//! The [`RemoteStore`] trait is the only capability the mirror client needs
//! from the cloud side: list, get metadata, download, create, update,
//! search by exact name, and delete (used by the duplicate cleanup pass).
//! How an implementation authenticates is its own concern.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::models::RemoteFileMeta;

/// MIME type of plain-text source files.
pub const MIME_TEXT: &str = "text/plain";
/// MIME type of native documents created from mirrored text.
pub const MIME_DOCUMENT: &str = "application/vnd.google-apps.document";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Credentials missing, expired, or rejected. Fatal for the run.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Timeouts, rate limits, and server errors. Retried with backoff.
    #[error("transient remote error: {0}")]
    Transient(String),
    #[error("remote file not found: {0}")]
    NotFound(String),
    /// Any other rejected request. Not retried.
    #[error("remote request failed: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }
}

/// Whether an `anyhow` error chain carries a fatal [`RemoteError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<RemoteError>())
        .any(RemoteError::is_fatal)
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List every file in `folder_id`, following pagination, optionally
    /// restricted to one MIME type. Trashed files are excluded.
    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: Option<&str>,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError>;

    async fn get_metadata(&self, file_id: &str) -> Result<RemoteFileMeta, RemoteError>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError>;

    /// Create a document named `name` in `folder_id` from plain text.
    /// Returns the new document id.
    async fn create_document(
        &self,
        folder_id: &str,
        name: &str,
        text: &str,
    ) -> Result<String, RemoteError>;

    /// Replace the body of an existing document.
    async fn update_document(&self, document_id: &str, text: &str) -> Result<(), RemoteError>;

    /// Files in `folder_id` whose name equals `name` exactly.
    async fn find_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError>;

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError>;
}

/// Bounded exponential backoff for transient remote errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
        )
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    /// capped at 2^5 × base.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts `max_retries` retries.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying remote operation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}
