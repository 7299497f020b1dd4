//! Poll-until-condition helper
//!
//! The suite never watches; it samples. [`TimeoutSampler`] re-runs an async
//! probe on a fixed interval until the probe produces a value or a
//! wall-clock budget runs out. Every wait in the suite goes through it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

/// Default interval between probe attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("timed out after {timeout:?} waiting for {what}{}", last_error_suffix(.last_error))]
    Timeout {
        what: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("probe failed while waiting for {what}: {message}")]
    Probe { what: String, message: String },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

/// Fixed-interval, wall-clock-bounded retry loop.
///
/// A probe returns `Ok(Some(value))` to finish, `Ok(None)` to be sampled
/// again, or `Err(_)` which is recorded and sampled again (the suite treats
/// transient API errors during a wait as "not yet"). There is no backoff
/// and no cancellation; a sampler either yields a value or times out.
pub struct TimeoutSampler {
    what: String,
    timeout: Duration,
    interval: Duration,
}

impl TimeoutSampler {
    /// Create a sampler for the condition described by `what`.
    ///
    /// `what` ends up in the timeout error, so phrase it as the thing being
    /// waited for ("DataVolume fedora-dv phase Succeeded").
    pub fn new(what: impl Into<String>, timeout: Duration) -> Self {
        Self {
            what: what.into(),
            timeout,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Override the probe interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sample until the probe yields a value or the budget runs out.
    ///
    /// Probe errors are remembered and retried; the last one is attached to
    /// the timeout error. The first probe fires immediately, so a zero
    /// timeout still allows exactly one attempt.
    pub async fn run<T, E, F, Fut>(&self, mut probe: F) -> Result<T, SamplerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: fmt::Display,
    {
        let start = tokio::time::Instant::now();
        let mut last_error: Option<String> = None;

        loop {
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    trace!(what = %self.what, "condition not met, re-sampling");
                }
                Err(e) => {
                    trace!(what = %self.what, error = %e, "probe error, re-sampling");
                    last_error = Some(e.to_string());
                }
            }

            if start.elapsed() >= self.timeout {
                return Err(SamplerError::Timeout {
                    what: self.what.clone(),
                    timeout: self.timeout,
                    last_error,
                });
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Like [`run`](Self::run), but a probe error aborts the wait instead
    /// of being retried. Used where an API error means the wait can never
    /// succeed (e.g. the watched resource was deleted by the product).
    pub async fn run_strict<T, E, F, Fut>(&self, mut probe: F) -> Result<T, SamplerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: fmt::Display,
    {
        let start = tokio::time::Instant::now();

        loop {
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    trace!(what = %self.what, "condition not met, re-sampling");
                }
                Err(e) => {
                    return Err(SamplerError::Probe {
                        what: self.what.clone(),
                        message: e.to_string(),
                    });
                }
            }

            if start.elapsed() >= self.timeout {
                return Err(SamplerError::Timeout {
                    what: self.what.clone(),
                    timeout: self.timeout,
                    last_error: None,
                });
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
#[path = "sampler_test.rs"]
mod tests;
