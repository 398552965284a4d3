//! Model call wrapper: key rotation plus rate-limit retry.
//!
//! ## Retry Strategy
//!
//! Only rate-limit class failures (`429` / "quota") are retried, and each
//! retry uses a freshly acquired credential, which by the least-used policy
//! is a different key whenever the pool has more than one. The backoff is a
//! fixed interval rather than exponential: the point is to move to another
//! key, not to wait out the one that failed. Any other error propagates on
//! the first attempt.
//!
//! The ceiling is `max_attempts × backoff`; there is no separate deadline.

use crate::backend::{ModelBackend, ModelRequest};
use crate::config::ExamConfig;
use crate::error::ExamError;
use crate::keys::KeyPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default wait between rate-limited attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(2000);

/// Issues model requests through a [`KeyPool`].
#[derive(Clone)]
pub struct ModelClient {
    backend: Arc<dyn ModelBackend>,
    pool: Arc<KeyPool>,
    backoff: Duration,
    max_attempts: Option<u32>,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ModelBackend>, pool: Arc<KeyPool>) -> Self {
        Self {
            backend,
            pool,
            backoff: DEFAULT_BACKOFF,
            max_attempts: None,
        }
    }

    /// Client using the retry settings from `config`.
    pub fn from_config(
        backend: Arc<dyn ModelBackend>,
        pool: Arc<KeyPool>,
        config: &ExamConfig,
    ) -> Self {
        Self::new(backend, pool)
            .with_backoff(config.retry_backoff())
            .with_max_attempts(config.max_attempts)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cap attempts per call. `None` (the default) means one attempt per
    /// pooled credential.
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts
            .unwrap_or(self.pool.len() as u32)
            .max(1)
    }

    /// Send `request`, rotating keys on rate limits.
    ///
    /// # Errors
    /// * [`ExamError::Backend`] for the first non-rate-limit failure.
    /// * [`ExamError::PoolExhausted`] when every attempt was rate-limited.
    pub async fn call(&self, operation: &str, request: &ModelRequest) -> Result<String, ExamError> {
        let attempts = self.attempts();
        let start = Instant::now();

        for attempt in 1..=attempts {
            let credential = self.pool.acquire();
            match self.backend.generate(request, &credential).await {
                Ok(text) => {
                    debug!(
                        "{}: attempt {} succeeded with key {} in {:?}",
                        operation,
                        attempt,
                        credential,
                        start.elapsed()
                    );
                    return Ok(text);
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(
                        "{}: key {} rate-limited (attempt {}/{})",
                        operation, credential, attempt, attempts
                    );
                    if attempt < attempts {
                        sleep(self.backoff).await;
                    }
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", operation, attempt, e);
                    return Err(ExamError::Backend {
                        operation: operation.to_string(),
                        message: e.message,
                    });
                }
            }
        }

        Err(ExamError::PoolExhausted {
            operation: operation.to_string(),
            attempts,
        })
    }
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("backend", &self.backend.name())
            .field("pool", &self.pool)
            .field("backoff", &self.backoff)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
