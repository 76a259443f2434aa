//! Error types for `morphont-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A concept snapshot batch failed schema validation. Every offending
  /// field is listed; the batch is rejected as a whole.
  #[error("invalid concept batch: {}", errors.join("; "))]
  Validation { errors: Vec<String> },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure reported by an external collaborator (retrieval client or
/// language model).
#[derive(Debug, Clone, Error)]
pub enum CollabError {
  /// The retrieval source kept failing after every retry was spent.
  #[error("retrieval failed after {attempts} attempt(s): {message}")]
  Retrieval { attempts: u32, message: String },

  /// The model endpoint could not be reached or returned an error status.
  #[error("model call failed: {0}")]
  Model(String),

  /// The collaborator answered, but the answer does not fit the schema.
  #[error("malformed collaborator output: {0}")]
  Malformed(String),
}

impl CollabError {
  /// Malformed output degrades to an empty contribution; everything else is
  /// fatal to a run.
  pub fn is_malformed(&self) -> bool { matches!(self, Self::Malformed(_)) }
}
