//! Error type for `morphont-providers`.

use morphont_pipeline::Attempt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("unexpected status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("xml error: {0}")]
  Xml(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The response parsed but lacks the fields we read.
  #[error("unexpected response shape: {0}")]
  Shape(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("no API key configured for the chat model")]
  MissingApiKey,
}

impl Error {
  /// Throttling, server errors and transport failures are worth retrying.
  /// Other client errors and undecodable bodies are not.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Http(e) => !e.is_decode() && !e.is_builder(),
      Self::Status { status, .. } => *status == 429 || *status >= 500,
      _ => false,
    }
  }
}

pub(crate) fn into_attempt<E: Into<Error>>(err: E) -> Attempt<Error> {
  let err = err.into();
  if err.is_transient() { Attempt::Transient(err) } else { Attempt::Permanent(err) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
