//! Per-iteration and final JSON artifacts.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::{Error, Result, state::IterationState};

/// Writes pretty-printed JSON files into one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
  dir: PathBuf,
}

impl ArtifactWriter {
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

  pub fn dir(&self) -> &Path { &self.dir }

  fn stamp() -> String { Utc::now().format("%Y%m%d_%H%M%S").to_string() }

  /// Serialize `value` to `<dir>/<file_name>`, creating the directory first.
  pub async fn write_json<T: Serialize + ?Sized>(
    &self,
    file_name: &str,
    value: &T,
  ) -> Result<PathBuf> {
    let path = self.dir.join(file_name);
    let body = serde_json::to_vec_pretty(value)?;

    tokio::fs::create_dir_all(&self.dir)
      .await
      .map_err(|source| Error::Artifact { path: self.dir.clone(), source })?;
    tokio::fs::write(&path, body)
      .await
      .map_err(|source| Error::Artifact { path: path.clone(), source })?;

    debug!(path = %path.display(), "wrote artifact");
    Ok(path)
  }

  /// Write the six per-cycle artifacts, tagged `iter{n}_{timestamp}`.
  pub async fn write_iteration(&self, state: &IterationState) -> Result<Vec<PathBuf>> {
    let tag = format!("iter{}_{}", state.iteration, Self::stamp());
    let delta = state.ontology.slice(&state.delta);

    Ok(vec![
      self
        .write_json(&format!("queries_{tag}.json"), &json!({
          "run_id": state.run_id,
          "iteration": state.iteration,
          "target_class": state.target_class,
          "queries": state.current_queries,
          "tried_queries": state.tried_queries,
        }))
        .await?,
      self.write_json(&format!("results_{tag}.json"), &state.hits).await?,
      self.write_json(&format!("summaries_{tag}.json"), &state.summaries).await?,
      self.write_json(&format!("candidates_{tag}.json"), &state.candidates).await?,
      self.write_json(&format!("ontology_delta_{tag}.json"), &delta).await?,
      self
        .write_json(&format!("diagnostics_{tag}.json"), &json!({
          "iteration": state.iteration,
          "rejected_candidates": state.rejected,
          "malformed": state.diagnostics,
        }))
        .await?,
    ])
  }

  /// Write the full ontology map as `final_ontology_<timestamp>.json`.
  pub async fn write_final(&self, state: &IterationState) -> Result<PathBuf> {
    self
      .write_json(
        &format!("final_ontology_{}.json", Self::stamp()),
        &state.ontology.concepts,
      )
      .await
  }
}

#[cfg(test)]
mod tests {
  use morphont_core::concept::{Candidate, Magnification};

  use super::*;

  #[tokio::test]
  async fn iteration_artifacts_are_tagged_and_parse_back() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::new(dir.path().join("run"));

    let mut state = IterationState::new("Tumor", dir.path(), 5);
    state.iteration = 2;
    state.current_queries = vec!["q".into()];
    let report = state
      .ontology
      .merge([Candidate::new("tumor_nest", [Magnification::X20], "nests")]);
    state.delta = report.delta;

    let paths = writer.write_iteration(&state).await.unwrap();
    assert_eq!(paths.len(), 6);
    for path in &paths {
      let name = path.file_name().unwrap().to_string_lossy().into_owned();
      assert!(name.contains("_iter2_"), "{name}");
    }

    let delta: serde_json::Value =
      serde_json::from_slice(&std::fs::read(&paths[4]).unwrap()).unwrap();
    assert_eq!(delta["tumor_nest"]["text"], "nests");
  }

  #[tokio::test]
  async fn final_snapshot_holds_every_concept() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::new(dir.path());
    let mut state = IterationState::new("Tumor", dir.path(), 5);
    state.ontology.merge([
      Candidate::new("a", [Magnification::X10], "x"),
      Candidate::new("b", [Magnification::X40], "y"),
    ]);

    let path = writer.write_final(&state).await.unwrap();
    let snapshot: serde_json::Value =
      serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(snapshot.as_object().unwrap().len(), 2);
  }
}
