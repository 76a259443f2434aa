//! Run-level configuration, deserialised by the binary from TOML and
//! environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Convergence and sizing knobs for one run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
  /// Stop once the ontology holds at least this many concepts.
  #[serde(default = "default_min_concepts")]
  pub min_concepts: usize,
  /// Stop after this many cycles regardless of concept count.
  #[serde(default = "default_max_iters")]
  pub max_iters:    u32,
  /// Result cap passed to the retrieval client per query.
  #[serde(default = "default_result_cap")]
  pub result_cap:   usize,
}

fn default_min_concepts() -> usize { 4 }
fn default_max_iters() -> u32 { 3 }
fn default_result_cap() -> usize { 5 }

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      min_concepts: default_min_concepts(),
      max_iters:    default_max_iters(),
      result_cap:   default_result_cap(),
    }
  }
}

/// Rate-limit and retry knobs shared by every call to one source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
  /// Minimum spacing between two requests to the same source.
  #[serde(default = "default_min_delay_ms")]
  pub min_delay_ms:   u64,
  /// Retries after the first attempt.
  #[serde(default = "default_max_retries")]
  pub max_retries:    u32,
  /// Upper bound on a single backoff wait.
  #[serde(default = "default_max_backoff_ms")]
  pub max_backoff_ms: u64,
}

fn default_min_delay_ms() -> u64 { 340 }
fn default_max_retries() -> u32 { 3 }
fn default_max_backoff_ms() -> u64 { 30_000 }

impl RetryConfig {
  pub fn min_delay(&self) -> Duration { Duration::from_millis(self.min_delay_ms) }

  pub fn max_backoff(&self) -> Duration { Duration::from_millis(self.max_backoff_ms) }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      min_delay_ms:   default_min_delay_ms(),
      max_retries:    default_max_retries(),
      max_backoff_ms: default_max_backoff_ms(),
    }
  }
}
