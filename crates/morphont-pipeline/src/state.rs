//! Run state threaded through the controller stages.

use std::{collections::BTreeSet, path::PathBuf};

use morphont_core::{
  cache::SearchId,
  collab::{Hit, Summary},
  concept::{Candidate, ConceptId},
  ontology::Ontology,
};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// The controller's states, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
  Plan,
  Search,
  Summarize,
  Extract,
  Merge,
  Persist,
  Observe,
  Mutate,
  Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
  /// The ontology reached the configured concept count.
  Converged,
  /// The iteration budget ran out first.
  BudgetExhausted,
}

/// A hit together with the query and cached search that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedHit {
  pub origin_query: String,
  pub search_id:    SearchId,
  #[serde(flatten)]
  pub hit:          Hit,
}

/// A summarized hit, ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizedHit {
  pub origin_query: String,
  pub search_id:    SearchId,
  pub title:        String,
  pub url:          String,
  pub snippet:      String,
  #[serde(flatten)]
  pub summary:      Summary,
}

/// A collaborator answer that did not fit its schema and was replaced by an
/// empty contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
  pub stage:   Stage,
  pub title:   String,
  pub url:     String,
  pub message: String,
}

/// Everything one run carries from stage to stage.
#[derive(Debug, Clone)]
pub struct IterationState {
  /// Tags every cached search and artifact of this run.
  pub run_id:          Uuid,
  pub target_class:    String,
  pub output_dir:      PathBuf,
  pub result_cap:      usize,
  /// Completed-or-current cycle; incremented on entry to `Plan`.
  pub iteration:       u32,
  /// Every query ever searched, in order, duplicates kept.
  pub tried_queries:   Vec<String>,
  pub current_queries: Vec<String>,
  pub hits:            Vec<TaggedHit>,
  pub summaries:       Vec<SummarizedHit>,
  pub candidates:      Vec<Candidate>,
  pub ontology:        Ontology,
  /// Identities created or changed by the latest merge.
  pub delta:           BTreeSet<ConceptId>,
  pub rejected:        usize,
  pub diagnostics:     Vec<Diagnostic>,
  pub stop:            bool,
  pub stop_reason:     Option<StopReason>,
}

impl IterationState {
  pub fn new(
    target_class: impl Into<String>,
    output_dir: impl Into<PathBuf>,
    result_cap: usize,
  ) -> Self {
    Self {
      run_id: Uuid::new_v4(),
      target_class: target_class.into(),
      output_dir: output_dir.into(),
      result_cap,
      iteration: 0,
      tried_queries: Vec::new(),
      current_queries: Vec::new(),
      hits: Vec::new(),
      summaries: Vec::new(),
      candidates: Vec::new(),
      ontology: Ontology::new(),
      delta: BTreeSet::new(),
      rejected: 0,
      diagnostics: Vec::new(),
      stop: false,
      stop_reason: None,
    }
  }

  /// The `n` most recently tried queries, most recent first.
  pub fn recent_queries(&self, n: usize) -> Vec<String> {
    self.tried_queries.iter().rev().take(n).cloned().collect()
  }

  /// Drop the per-cycle working sets; the ontology and query history stay.
  /// Diagnostics are cleared by `Persist` once written, so mutation notes
  /// carry into the next cycle's file.
  pub(crate) fn reset_cycle(&mut self) {
    self.hits.clear();
    self.summaries.clear();
    self.candidates.clear();
    self.delta.clear();
    self.rejected = 0;
  }
}

/// What a finished run hands back.
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub run_id:         Uuid,
  pub iterations:     u32,
  pub stop_reason:    StopReason,
  pub ontology:       Ontology,
  pub tried_queries:  Vec<String>,
  pub final_snapshot: PathBuf,
}
