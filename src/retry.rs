use crate::error::{Result, SyncError};
use std::time::Duration;

/// One row of the retry-policy table.
#[derive(Debug, Clone, Copy)]
pub struct RetryProfile {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable: &'static [&'static str],
}

pub const DEFAULT: RetryProfile = RetryProfile {
    max_retries: 3,
    base_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(30),
    retryable: &["not found", "connection", "deadline exceeded"],
};

pub const GET_FILE_ID: RetryProfile = RetryProfile {
    max_retries: 3,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(10),
    retryable: &["not found"],
};

pub const DOWNLOAD: RetryProfile = RetryProfile {
    max_retries: 5,
    base_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(30),
    retryable: &["connection", "deadline exceeded", "internal error"],
};

pub const UPLOAD: RetryProfile = RetryProfile {
    max_retries: 4,
    base_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(20),
    retryable: &["connection", "deadline exceeded"],
};

pub const LIST: RetryProfile = RetryProfile {
    max_retries: 4,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(15),
    retryable: &["connection", "deadline exceeded", "internal error"],
};

/// Run `op` under `profile`'s exponential backoff (×2, clamped at
/// `max_delay`), short-circuiting on the first non-retryable error or
/// on `Cancelled`/`AuthRevoked`/`AuthExpired`.
pub async fn retry<F, Fut, T>(profile: RetryProfile, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = profile.base_delay;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = match &err {
                    SyncError::Cancelled | SyncError::AuthRevoked | SyncError::AuthExpired => false,
                    _ => err.matches_any(profile.retryable),
                };
                if !retryable || attempt >= profile.max_retries {
                    return Err(err);
                }
                attempt += 1;
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, profile.max_delay);
            }
        }
    }
}
