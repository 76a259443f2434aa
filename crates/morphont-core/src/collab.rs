//! Capability boundaries for the external collaborators of a run.
//!
//! Retrieval and model inference are reached only through these traits. The
//! schema checks at the boundary (candidates, summaries, query lists) live
//! here too, so every implementation degrades malformed output the same way.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  CollabError,
  cache::ResultRecord,
  concept::{Candidate, EvidenceRef},
};

// ─── Payloads ────────────────────────────────────────────────────────────────

/// One ranked record returned by a retrieval source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
  #[serde(default)]
  pub title:     String,
  #[serde(default)]
  pub snippet:   String,
  #[serde(default)]
  pub url:       String,
  #[serde(default)]
  pub published: String,
  #[serde(default)]
  pub license:   String,
}

impl Hit {
  pub fn evidence(&self) -> EvidenceRef {
    EvidenceRef::new(self.title.clone(), self.url.clone())
  }
}

/// Bounded structured summary of one hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
  #[serde(default)]
  pub summary:          String,
  #[serde(default)]
  pub low_power_terms:  Vec<String>,
  #[serde(default)]
  pub high_power_terms: Vec<String>,
  #[serde(default)]
  pub caveats:          Vec<String>,
}

/// The unit of evidence handed to a [`ConceptExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
  pub title:   String,
  pub url:     String,
  pub snippet: String,
  pub summary: Summary,
}

impl Evidence {
  pub fn reference(&self) -> EvidenceRef {
    EvidenceRef::new(self.title.clone(), self.url.clone())
  }
}

/// A cached result as shown to a [`SnapshotDrafter`], numbered from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
  pub index:     usize,
  pub title:     String,
  pub snippet:   String,
  pub url:       String,
  pub published: String,
  pub license:   String,
}

impl ContextEntry {
  /// The first `limit` results, in stored order.
  pub fn from_results(results: &[ResultRecord], limit: usize) -> Vec<Self> {
    results
      .iter()
      .take(limit)
      .enumerate()
      .map(|(i, record)| Self {
        index:     i + 1,
        title:     record.item.title.clone(),
        snippet:   record.item.snippet.clone(),
        url:       record.item.url.clone(),
        published: record.item.published.clone(),
        license:   record.item.license.clone(),
      })
      .collect()
  }
}

/// Plain-text evidence block for a drafting prompt.
pub fn summarise_context(entries: &[ContextEntry]) -> String {
  fn or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() { fallback } else { value }
  }

  entries
    .iter()
    .map(|e| {
      format!(
        "[{}] {}\nURL: {}\nSummary: {}",
        e.index,
        or(&e.title, "Untitled"),
        e.url,
        or(&e.snippet, "N/A")
      )
    })
    .collect::<Vec<_>>()
    .join("\n\n")
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A literature source: query in, ranked hits out.
///
/// Implementations own their rate limiting and retry; an `Err` means the
/// retries are spent.
pub trait RetrievalClient: Send + Sync {
  /// Provider tag recorded with every cached search.
  fn source(&self) -> &str;

  fn search<'a>(
    &'a self,
    query: &'a str,
    cap: usize,
  ) -> impl Future<Output = Result<Vec<Hit>, CollabError>> + Send + 'a;
}

/// Proposes search queries for a target class.
pub trait QueryPlanner: Send + Sync {
  /// Fresh queries conditioned on `tried` (most recent first).
  fn plan<'a>(
    &'a self,
    target: &'a str,
    tried: &'a [String],
  ) -> impl Future<Output = Result<Vec<String>, CollabError>> + Send + 'a;

  /// Queries unlike everything in `tried`, steered by `hints`.
  fn mutate<'a>(
    &'a self,
    target: &'a str,
    tried: &'a [String],
    hints: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, CollabError>> + Send + 'a;
}

/// Reduces a hit to a [`Summary`].
pub trait Summarizer: Send + Sync {
  fn summarize<'a>(
    &'a self,
    hit: &'a Hit,
  ) -> impl Future<Output = Result<Summary, CollabError>> + Send + 'a;
}

/// Turns summarized evidence into concept candidates.
pub trait ConceptExtractor: Send + Sync {
  /// Label stored with every extraction record.
  fn label(&self) -> &str;

  fn extract<'a>(
    &'a self,
    target: &'a str,
    evidence: &'a Evidence,
  ) -> impl Future<Output = Result<Vec<Candidate>, CollabError>> + Send + 'a;
}

/// Drafts concept items in the persisted snapshot schema
/// ([`crate::snapshot::ConceptItem`]).
pub trait SnapshotDrafter: Send + Sync {
  /// Label stored with every drafted extraction record.
  fn label(&self) -> &str;

  /// One item for `keyword`, grounded on the cached `context` block.
  fn draft_item<'a>(
    &'a self,
    keyword: &'a str,
    source: &'a str,
    context: &'a str,
  ) -> impl Future<Output = Result<serde_json::Value, CollabError>> + Send + 'a;

  /// A whole batch enumerating concepts for each class in `classes`.
  fn draft_batch<'a>(
    &'a self,
    dataset: &'a str,
    classes: &'a serde_json::Value,
    num_classes: Option<usize>,
  ) -> impl Future<Output = Result<serde_json::Value, CollabError>> + Send + 'a;
}

// ─── Boundary parsing ────────────────────────────────────────────────────────

/// Validate extractor output against the candidate schema.
///
/// Anything but a JSON array is malformed. Array elements that do not
/// deserialize, or whose text exceeds [`Candidate::MAX_TEXT_CHARS`], are
/// dropped; the rest are kept.
pub fn parse_candidates(value: serde_json::Value) -> Result<Vec<Candidate>, CollabError> {
  let serde_json::Value::Array(items) = value else {
    return Err(CollabError::Malformed("expected a JSON array of candidates".into()));
  };

  Ok(
    items
      .into_iter()
      .filter_map(|item| serde_json::from_value::<Candidate>(item).ok())
      .filter(|c| c.text.chars().count() <= Candidate::MAX_TEXT_CHARS)
      .collect(),
  )
}

/// Validate summarizer output.
pub fn parse_summary(value: serde_json::Value) -> Result<Summary, CollabError> {
  if !value.is_object() {
    return Err(CollabError::Malformed("expected a JSON summary object".into()));
  }
  serde_json::from_value(value).map_err(|e| CollabError::Malformed(e.to_string()))
}

/// A drafted single item must at least be a JSON object; its fields are
/// checked later against the snapshot schema.
pub fn parse_draft_item(value: serde_json::Value) -> Result<serde_json::Value, CollabError> {
  if value.is_object() {
    Ok(value)
  } else {
    Err(CollabError::Malformed("expected a JSON concept object".into()))
  }
}

pub fn parse_draft_batch(value: serde_json::Value) -> Result<serde_json::Value, CollabError> {
  if value.is_array() {
    Ok(value)
  } else {
    Err(CollabError::Malformed("expected a JSON array of concepts".into()))
  }
}

/// Keep the non-blank strings of a JSON query list, trimmed. Non-arrays
/// yield nothing.
pub fn parse_queries(value: &serde_json::Value) -> Vec<String> {
  value
    .as_array()
    .map(|items| {
      items
        .iter()
        .filter_map(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_owned)
        .collect()
    })
    .unwrap_or_default()
}
