//! Retry classification and exponential backoff.

use std::future::Future;
use std::time::Duration;

use akidb_client_core::{ClientResult, RetryConfig, TransportError, TransportErrorKind};
use rand::Rng;
use tracing::warn;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff
    Transient,
    /// Fail immediately
    Permanent,
}

/// Classifies a transport error kind.
#[must_use]
pub fn classify(kind: TransportErrorKind) -> ErrorClass {
    match kind {
        TransportErrorKind::Unavailable
        | TransportErrorKind::DeadlineExceeded
        | TransportErrorKind::ResourceExhausted => ErrorClass::Transient,
        TransportErrorKind::Unauthenticated
        | TransportErrorKind::PermissionDenied
        | TransportErrorKind::InvalidArgument
        | TransportErrorKind::AlreadyExists
        | TransportErrorKind::NotFound
        | TransportErrorKind::Unimplemented
        | TransportErrorKind::Internal
        | TransportErrorKind::Unknown => ErrorClass::Permanent,
    }
}

#[must_use]
pub fn is_transient(kind: TransportErrorKind) -> bool {
    classify(kind) == ErrorClass::Transient
}

/// Bounded exponential backoff with additive jitter.
///
/// `max_retries` counts dispatch attempts, the first one included: with
/// `max_retries = 3` an operation is tried at most three times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base: Duration, cap: Duration, jitter_ratio: f64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base,
            cap: cap.max(base),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.base_backoff(),
            config.max_backoff(),
            config.jitter_ratio,
        )
    }

    /// Same bounds, no jitter. Useful when delays must be predictable.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ratio = 0.0;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt may follow `attempts` failed ones.
    #[must_use]
    pub fn should_retry(&self, attempts: u32, error: &TransportError) -> bool {
        is_transient(error.kind) && attempts < self.max_retries
    }

    /// Delay before retry number `retry` (zero-based), without jitter:
    /// `base * 2^retry`, capped.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        // 2^30 times any sane base is already far past the cap
        const MAX_EXPONENT: u32 = 30;
        let power = 2u128.saturating_pow(retry.min(MAX_EXPONENT));
        let millis = self.base.as_millis().saturating_mul(power);
        let capped = millis.min(self.cap.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Delay before retry number `retry` (zero-based), jitter included.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = self.base_delay(retry);
        let max_jitter = delay.mul_f64(self.jitter_ratio);
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=max_jitter)
        };
        (delay + jitter).min(self.cap)
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt bound
    /// is reached. `op` receives the one-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> ClientResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retry = err
                        .as_transport()
                        .is_some_and(|transport| self.should_retry(attempt, transport));
                    if !retry {
                        return Err(err);
                    }
                    let delay = self.backoff(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
