//! Error type for `morphont-pipeline`.

use std::path::PathBuf;

use morphont_core::CollabError;
use thiserror::Error;

use crate::state::Stage;

#[derive(Debug, Error)]
pub enum Error {
  /// The search cache failed. Provenance would be lost, so this is fatal.
  #[error("cache error: {0}")]
  Cache(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Collab(#[from] CollabError),

  /// No usable cached search for an extraction request.
  #[error("{0}")]
  SearchLookup(String),

  #[error("failed to write artifact {path:?}: {source}")]
  Artifact {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stage failed; carries the cycle and the last stage that completed.
  #[error(
    "iteration {iteration}: {stage} failed (last completed: {}): {source}",
    last_completed.map_or_else(|| "none".to_owned(), |s| s.to_string())
  )]
  Stage {
    iteration:      u32,
    stage:          Stage,
    last_completed: Option<Stage>,
    #[source]
    source:         Box<Error>,
  },

  #[error("run cancelled in iteration {iteration} before {stage}")]
  Cancelled { iteration: u32, stage: Stage },
}

impl Error {
  pub(crate) fn cache<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Cache(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
