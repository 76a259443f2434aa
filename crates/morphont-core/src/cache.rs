//! The `SearchCache` trait and the records it persists.
//!
//! The trait is implemented by storage backends (e.g.
//! `morphont-store-sqlite`). The pipeline depends on this abstraction, not on
//! any concrete backend.
//!
//! Searches and extractions are append-only provenance records: the same
//! keyword may be searched many times and every call keeps its own row.
//! Results are deduplicated only within one search, on `(search_id, title,
//! url)`.

use std::{collections::BTreeMap, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collab::Hit;

pub type SearchId = i64;
pub type ExtractionId = i64;

// ─── Records ─────────────────────────────────────────────────────────────────

/// Input to [`SearchCache::record_search`]. `id` and `requested_at` are
/// assigned by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSearch {
  pub keyword:     String,
  /// Provider tag, e.g. `"pubmed"`.
  pub source:      String,
  /// The tool or pipeline stage that issued the call.
  pub tool:        String,
  pub max_results: u32,
  pub args:        serde_json::Value,
}

/// One invocation of a retrieval call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
  pub id:           SearchId,
  pub keyword:      String,
  pub source:       String,
  pub tool:         String,
  pub max_results:  u32,
  pub args:         serde_json::Value,
  pub requested_at: DateTime<Utc>,
}

/// One item to be stored under a search. Missing provider fields are empty
/// strings, never NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
  #[serde(default)]
  pub title:     String,
  #[serde(default)]
  pub url:       String,
  #[serde(default)]
  pub published: String,
  #[serde(default)]
  pub license:   String,
  #[serde(default)]
  pub snippet:   String,
  /// Full provider payload, opaque to the cache.
  #[serde(default)]
  pub payload:   serde_json::Value,
}

impl From<&Hit> for ResultItem {
  fn from(hit: &Hit) -> Self {
    Self {
      title:     hit.title.clone(),
      url:       hit.url.clone(),
      published: hit.published.clone(),
      license:   hit.license.clone(),
      snippet:   hit.snippet.clone(),
      payload:   serde_json::to_value(hit).unwrap_or_default(),
    }
  }
}

/// A stored result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
  pub search_id: SearchId,
  #[serde(flatten)]
  pub item:      ResultItem,
}

/// Input to [`SearchCache::record_extraction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExtraction {
  pub search_id: SearchId,
  /// Which extractor produced the content (model name, tool label, ...).
  pub extractor: String,
  pub keyword:   String,
  /// Prompt, evidence summary and extracted fields: whatever the extractor
  /// wants to keep.
  pub content:   serde_json::Value,
}

/// A stored extraction artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
  pub id:         ExtractionId,
  pub search_id:  SearchId,
  pub extractor:  String,
  pub keyword:    String,
  pub content:    serde_json::Value,
  pub created_at: DateTime<Utc>,
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// A search together with (optionally) its results and extractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBundle {
  pub search:      SearchRecord,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub results:     Option<Vec<ResultRecord>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub extractions: Option<Vec<ExtractionRecord>>,
}

/// Everything cached for one keyword, grouped by source. Within a source,
/// searches are ordered most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordBundle {
  pub keyword: String,
  pub sources: BTreeMap<String, Vec<SearchBundle>>,
}

impl KeywordBundle {
  pub fn is_empty(&self) -> bool { self.sources.is_empty() }

  /// Number of searches across all sources.
  pub fn search_count(&self) -> usize { self.sources.values().map(Vec::len).sum() }
}

/// Summary of [`write_results`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
  pub search_id:    SearchId,
  /// Rows actually inserted.
  pub added:        usize,
  /// Rows stored under the search after the insert.
  pub total_cached: usize,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Durable store of search invocations, their results and downstream
/// extractions.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait SearchCache: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Record a retrieval call. Always inserts a new row; searches are never
  /// deduplicated.
  fn record_search(
    &self,
    search: NewSearch,
  ) -> impl Future<Output = Result<SearchId, Self::Error>> + Send + '_;

  /// Insert result rows under `search_id`, skipping any whose `(search_id,
  /// title, url)` already exists. Returns the number of rows added.
  fn record_results(
    &self,
    search_id: SearchId,
    items: Vec<ResultItem>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Append an extraction artifact. Never deduplicated.
  fn record_extraction(
    &self,
    extraction: NewExtraction,
  ) -> impl Future<Output = Result<ExtractionId, Self::Error>> + Send + '_;

  /// All searches for `keyword` (optionally restricted to `source`) with
  /// their results and extractions. Empty bundle when nothing matches.
  fn fetch_by_keyword<'a>(
    &'a self,
    keyword: &'a str,
    source: Option<&'a str>,
  ) -> impl Future<Output = Result<KeywordBundle, Self::Error>> + Send + 'a;

  /// One search, or `None` if the id is unknown.
  fn fetch_by_search_id(
    &self,
    search_id: SearchId,
    include_results: bool,
    include_extractions: bool,
  ) -> impl Future<Output = Result<Option<SearchBundle>, Self::Error>> + Send + '_;

  /// The most recent search for `keyword`, if any.
  fn latest_search<'a>(
    &'a self,
    keyword: &'a str,
    source: Option<&'a str>,
  ) -> impl Future<Output = Result<Option<SearchRecord>, Self::Error>> + Send + 'a;

  /// Extractions filtered by search and/or keyword, most recent first.
  fn list_extractions<'a>(
    &'a self,
    search_id: Option<SearchId>,
    keyword: Option<&'a str>,
  ) -> impl Future<Output = Result<Vec<ExtractionRecord>, Self::Error>> + Send + 'a;

  /// Count of result rows stored under `search_id`.
  fn count_results(
    &self,
    search_id: SearchId,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Delete a search; its results and extractions go with it. Returns
  /// whether a row was removed.
  fn delete_search(
    &self,
    search_id: SearchId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

/// Record a search and its results in one step.
pub async fn write_results<C>(
  cache: &C,
  search: NewSearch,
  items: Vec<ResultItem>,
) -> Result<WriteSummary, C::Error>
where
  C: SearchCache,
{
  let search_id = cache.record_search(search).await?;
  let added = cache.record_results(search_id, items).await?;
  let total_cached = cache.count_results(search_id).await?;
  Ok(WriteSummary { search_id, added, total_cached })
}
