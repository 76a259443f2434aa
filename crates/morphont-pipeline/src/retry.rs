//! Rate limiting and retry for calls to one external source.
//!
//! A [`RateLimiter`] is shared (it is `Clone`, backed by an `Arc`) by every
//! caller that talks to the same source. Calls are spaced by at least the
//! policy's minimum delay, measured from the end of the previous exchange.
//! Each transient failure that will be retried raises a shared backoff level
//! that widens the spacing for *all* outstanding callers; a call that ends
//! any other way (success, permanent failure, retries spent) brings it back
//! down.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use morphont_core::CollabError;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Highest exponent applied to the base delay.
const MAX_BACKOFF_EXP: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay:  Duration,
  pub max_backoff: Duration,
}

impl RetryPolicy {
  pub fn from_config(config: &RetryConfig) -> Self {
    Self {
      max_retries: config.max_retries,
      base_delay:  config.min_delay(),
      max_backoff: config.max_backoff(),
    }
  }

  /// Spacing enforced before the next call at backoff `level`:
  /// `base_delay * 2^level`, capped at `max_backoff`. Level 0 is the plain
  /// minimum delay.
  pub fn spacing(&self, level: u32) -> Duration {
    let exp = level.min(MAX_BACKOFF_EXP);
    self
      .base_delay
      .saturating_mul(1 << exp)
      .min(self.max_backoff.max(self.base_delay))
  }
}

impl Default for RetryPolicy {
  fn default() -> Self { Self::from_config(&RetryConfig::default()) }
}

/// Classification of one failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
  /// Worth retrying: throttling, server errors, dropped connections.
  Transient(E),
  /// Retrying cannot help, e.g. a 4xx other than 429.
  Permanent(E),
}

/// The call gave up. `attempts` counts every request actually sent.
#[derive(Debug)]
pub struct RetryError<E> {
  pub attempts: u32,
  pub last:     E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
  }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl<E: fmt::Display> From<RetryError<E>> for CollabError {
  fn from(err: RetryError<E>) -> Self {
    CollabError::Retrieval { attempts: err.attempts, message: err.last.to_string() }
  }
}

struct LimiterState {
  last_call: Option<Instant>,
  level:     u32,
}

/// Spacing and retry shared across all callers of one source.
#[derive(Clone)]
pub struct RateLimiter {
  policy: RetryPolicy,
  state:  Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      policy,
      state: Arc::new(Mutex::new(LimiterState { last_call: None, level: 0 })),
    }
  }

  pub fn policy(&self) -> &RetryPolicy { &self.policy }

  /// Current shared backoff level.
  pub async fn level(&self) -> u32 { self.state.lock().await.level }

  /// Wait until this caller may send. The lock is held across the sleep so
  /// concurrent callers queue up behind one another.
  async fn wait_turn(&self) {
    let mut state = self.state.lock().await;
    if let Some(last) = state.last_call {
      tokio::time::sleep_until(last + self.policy.spacing(state.level)).await;
    }
    state.last_call = Some(Instant::now());
  }

  /// Stamp the end of an attempt and move the shared level: up when the
  /// caller is about to retry, back to zero otherwise.
  async fn finish_attempt(&self, retrying: bool) -> u32 {
    let mut state = self.state.lock().await;
    state.last_call = Some(Instant::now());
    state.level = if retrying { state.level.saturating_add(1) } else { 0 };
    state.level
  }

  /// Run `op` under the limiter, retrying transient failures up to
  /// `max_retries` times.
  pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
  where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
  {
    let mut attempts = 0;
    loop {
      self.wait_turn().await;
      attempts += 1;

      let outcome = op().await;
      let retrying = matches!(outcome, Err(Attempt::Transient(_)))
        && attempts <= self.policy.max_retries;
      let level = self.finish_attempt(retrying).await;

      match outcome {
        Ok(value) => return Ok(value),
        Err(Attempt::Permanent(last)) => {
          debug!(attempts, error = %last, "permanent failure");
          return Err(RetryError { attempts, last });
        }
        Err(Attempt::Transient(last)) if !retrying => {
          warn!(attempts, error = %last, "retries exhausted");
          return Err(RetryError { attempts, last });
        }
        Err(Attempt::Transient(last)) => {
          warn!(
            attempt = attempts,
            max_retries = self.policy.max_retries,
            backoff_ms = self.policy.spacing(level).as_millis() as u64,
            error = %last,
            "transient failure, backing off"
          );
        }
      }
    }
  }
}
