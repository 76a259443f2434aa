//! Draft one snapshot item from a cached search.
//!
//! The search is picked by id or as the latest one for a keyword; its first
//! results become the evidence block for a [`SnapshotDrafter`]. The draft is
//! recorded as an extraction whose `extraction` key holds a snapshot-schema
//! object, which is what ontology tree export reads back.

use morphont_core::{
  cache::{ExtractionId, NewExtraction, ResultRecord, SearchCache, SearchId, SearchRecord},
  collab::{ContextEntry, SnapshotDrafter, summarise_context},
  snapshot::{placeholder_item, validate_item},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{Error, Result};

/// Results shown to the drafter unless the caller asks otherwise.
pub const DEFAULT_MAX_CONTEXT: usize = 5;

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
  pub keyword:     String,
  pub source:      Option<String>,
  /// Use this search instead of the latest one for `keyword`.
  pub search_id:   Option<SearchId>,
  pub max_context: usize,
}

impl ExtractionRequest {
  pub fn new(keyword: impl Into<String>) -> Self {
    Self {
      keyword:     keyword.into(),
      source:      None,
      search_id:   None,
      max_context: DEFAULT_MAX_CONTEXT,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
  pub keyword:       String,
  pub source:        String,
  pub search_id:     SearchId,
  pub extraction_id: ExtractionId,
  pub extractor:     String,
  pub summary:       String,
  pub context:       Vec<ContextEntry>,
  pub extraction:    Value,
  /// Set when the draft was malformed and a placeholder was stored.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:         Option<String>,
  /// Snapshot schema problems of the stored item.
  pub problems:      Vec<String>,
}

async fn select_search<C>(cache: &C, request: &ExtractionRequest) -> Result<SearchRecord>
where
  C: SearchCache,
{
  let keyword = &request.keyword;

  let Some(search_id) = request.search_id else {
    return cache
      .latest_search(keyword, request.source.as_deref())
      .await
      .map_err(Error::cache)?
      .ok_or_else(|| {
        Error::SearchLookup(format!(
          "no cached searches for keyword '{keyword}' (source={})",
          request.source.as_deref().unwrap_or("any")
        ))
      });
  };

  let search = cache
    .fetch_by_search_id(search_id, false, false)
    .await
    .map_err(Error::cache)?
    .ok_or_else(|| Error::SearchLookup(format!("search id {search_id} not found")))?
    .search;

  if &search.keyword != keyword {
    return Err(Error::SearchLookup(format!(
      "search id {search_id} keyword mismatch (expected '{keyword}', found '{}')",
      search.keyword
    )));
  }
  if let Some(source) = &request.source
    && &search.source != source
  {
    return Err(Error::SearchLookup(format!(
      "search id {search_id} source mismatch (expected '{source}', found '{}')",
      search.source
    )));
  }
  Ok(search)
}

async fn cached_results<C>(cache: &C, search_id: SearchId) -> Result<Vec<ResultRecord>>
where
  C: SearchCache,
{
  let results = cache
    .fetch_by_search_id(search_id, true, false)
    .await
    .map_err(Error::cache)?
    .and_then(|bundle| bundle.results)
    .unwrap_or_default();

  if results.is_empty() {
    return Err(Error::SearchLookup(format!(
      "no cached results for search id {search_id}; run a search first"
    )));
  }
  Ok(results)
}

/// Draft and record one item. A malformed draft is stored as a placeholder
/// with the error attached; any other collaborator failure is returned.
pub async fn run_extraction<C, D>(
  cache: &C,
  drafter: &D,
  request: &ExtractionRequest,
) -> Result<ExtractionReport>
where
  C: SearchCache,
  D: SnapshotDrafter,
{
  let search = select_search(cache, request).await?;
  let results = cached_results(cache, search.id).await?;

  let context = ContextEntry::from_results(&results, request.max_context.max(1));
  let summary = summarise_context(&context);

  let (extraction, error) =
    match drafter.draft_item(&search.keyword, &search.source, &summary).await {
      Ok(item) => (item, None),
      Err(err) if err.is_malformed() => {
        warn!(search_id = search.id, error = %err, "draft unusable, storing placeholder");
        (placeholder_item(), Some(err.to_string()))
      }
      Err(err) => return Err(err.into()),
    };
  let problems = validate_item(&extraction);

  let extraction_id = cache
    .record_extraction(NewExtraction {
      search_id: search.id,
      extractor: drafter.label().to_owned(),
      keyword:   search.keyword.clone(),
      content:   json!({
        "keyword": search.keyword,
        "source": search.source,
        "tool_name": search.tool,
        "search_id": search.id,
        "summary": summary,
        "context": context,
        "extraction": extraction,
        "error": error,
        "problems": problems,
      }),
    })
    .await
    .map_err(Error::cache)?;

  info!(
    search_id = search.id,
    extraction_id,
    context = context.len(),
    problems = problems.len(),
    "recorded extraction"
  );

  Ok(ExtractionReport {
    keyword: search.keyword,
    source: search.source,
    search_id: search.id,
    extraction_id,
    extractor: drafter.label().to_owned(),
    summary,
    context,
    extraction,
    error,
    problems,
  })
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use morphont_core::{
    CollabError,
    cache::{NewSearch, ResultItem, write_results},
    snapshot::build_tree,
  };
  use morphont_store_sqlite::SqliteCache;

  use super::*;

  struct FakeDrafter {
    reply: Box<dyn Fn() -> Result<Value, CollabError> + Send + Sync>,
    seen:  Mutex<Vec<String>>,
  }

  impl FakeDrafter {
    fn new(reply: impl Fn() -> Result<Value, CollabError> + Send + Sync + 'static) -> Self {
      Self { reply: Box::new(reply), seen: Mutex::new(Vec::new()) }
    }
  }

  impl SnapshotDrafter for FakeDrafter {
    fn label(&self) -> &str { "fake-drafter" }

    async fn draft_item(
      &self,
      _keyword: &str,
      _source: &str,
      context: &str,
    ) -> Result<Value, CollabError> {
      self.seen.lock().unwrap().push(context.to_owned());
      (self.reply)()
    }

    async fn draft_batch(
      &self,
      _dataset: &str,
      _classes: &Value,
      _num_classes: Option<usize>,
    ) -> Result<Value, CollabError> {
      (self.reply)()
    }
  }

  fn nest() -> Value {
    json!({
      "name": "Subcapsular tumor nest",
      "definition": "Cohesive metastatic cells under the nodal capsule.",
      "synonyms": ["subcapsular deposit"],
      "concept_type": "morphology",
      "positives": ["cohesive clusters", "nuclear atypia", "subcapsular sinus location"],
      "negatives": ["sinus histiocytes", "lymphoid follicles", "adipocytes"],
      "magnifications": ["10x", "20x"]
    })
  }

  async fn cache_with(keyword: &str, source: &str, titles: &[&str]) -> (SqliteCache, SearchId) {
    let cache = SqliteCache::open_in_memory().await.unwrap();
    let id = add_search(&cache, keyword, source, titles).await;
    (cache, id)
  }

  async fn add_search(cache: &SqliteCache, keyword: &str, source: &str, titles: &[&str]) -> SearchId {
    let items = titles
      .iter()
      .map(|t| ResultItem {
        title: (*t).to_owned(),
        url: format!("https://example.org/{t}"),
        snippet: format!("{t} snippet"),
        ..ResultItem::default()
      })
      .collect();
    let search = NewSearch {
      keyword:     keyword.to_owned(),
      source:      source.to_owned(),
      tool:        "search_pubmed".to_owned(),
      max_results: 10,
      args:        json!({}),
    };
    write_results(cache, search, items).await.unwrap().search_id
  }

  fn lookup_message(err: Error) -> String {
    match err {
      Error::SearchLookup(message) => message,
      other => panic!("expected a lookup error, got {other}"),
    }
  }

  #[tokio::test]
  async fn drafted_item_shows_up_in_the_exported_tree() {
    let (cache, search_id) = cache_with("nodal metastasis", "pubmed", &["a", "b"]).await;
    let drafter = FakeDrafter::new(|| Ok(nest()));

    let report = run_extraction(&cache, &drafter, &ExtractionRequest::new("nodal metastasis"))
      .await
      .unwrap();

    assert_eq!(report.search_id, search_id);
    assert!(report.problems.is_empty(), "{:?}", report.problems);
    assert_eq!(report.extractor, "fake-drafter");

    let records = cache.list_extractions(None, Some("nodal metastasis")).await.unwrap();
    let tree = build_tree(true, &records).unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree[2]["name"], "Subcapsular tumor nest");
    assert_eq!(records[0].content["tool_name"], "search_pubmed");
  }

  #[tokio::test]
  async fn context_is_limited_to_the_first_results() {
    let (cache, _) = cache_with("k", "pubmed", &["a", "b", "c"]).await;
    let drafter = FakeDrafter::new(|| Ok(nest()));
    let request = ExtractionRequest { max_context: 2, ..ExtractionRequest::new("k") };

    let report = run_extraction(&cache, &drafter, &request).await.unwrap();

    assert_eq!(report.context.len(), 2);
    let seen = drafter.seen.lock().unwrap();
    assert!(seen[0].starts_with("[1] a\nURL: https://example.org/a\nSummary: a snippet"));
    assert!(!seen[0].contains("[3]"));
  }

  #[tokio::test]
  async fn latest_search_is_used_unless_an_id_is_given() {
    let (cache, older) = cache_with("k", "pubmed", &["old"]).await;
    let newer = add_search(&cache, "k", "pubmed", &["new"]).await;
    let drafter = FakeDrafter::new(|| Ok(nest()));

    let report = run_extraction(&cache, &drafter, &ExtractionRequest::new("k")).await.unwrap();
    assert_eq!(report.search_id, newer);

    let request = ExtractionRequest { search_id: Some(older), ..ExtractionRequest::new("k") };
    let report = run_extraction(&cache, &drafter, &request).await.unwrap();
    assert_eq!(report.search_id, older);
    assert_eq!(report.context[0].title, "old");
  }

  #[tokio::test]
  async fn mismatched_or_missing_searches_are_reported() {
    let (cache, id) = cache_with("k", "pubmed", &["a"]).await;
    let drafter = FakeDrafter::new(|| Ok(nest()));

    let request = ExtractionRequest { search_id: Some(id), ..ExtractionRequest::new("other") };
    let message = lookup_message(run_extraction(&cache, &drafter, &request).await.unwrap_err());
    assert!(message.contains("keyword mismatch"), "{message}");

    let request = ExtractionRequest {
      search_id: Some(id),
      source: Some("europe_pmc".into()),
      ..ExtractionRequest::new("k")
    };
    let message = lookup_message(run_extraction(&cache, &drafter, &request).await.unwrap_err());
    assert!(message.contains("source mismatch"), "{message}");

    let request = ExtractionRequest { search_id: Some(id + 100), ..ExtractionRequest::new("k") };
    let message = lookup_message(run_extraction(&cache, &drafter, &request).await.unwrap_err());
    assert!(message.contains("not found"), "{message}");

    let request = ExtractionRequest { source: Some("europe_pmc".into()), ..ExtractionRequest::new("k") };
    let message = lookup_message(run_extraction(&cache, &drafter, &request).await.unwrap_err());
    assert_eq!(message, "no cached searches for keyword 'k' (source=europe_pmc)");

    assert!(drafter.seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn search_without_results_is_rejected() {
    let (cache, id) = cache_with("k", "pubmed", &[]).await;
    let drafter = FakeDrafter::new(|| Ok(nest()));

    let message = lookup_message(
      run_extraction(&cache, &drafter, &ExtractionRequest::new("k")).await.unwrap_err(),
    );
    assert!(message.contains(&format!("search id {id}")), "{message}");
    assert!(cache.list_extractions(Some(id), None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn malformed_draft_is_stored_as_a_placeholder() {
    let (cache, id) = cache_with("k", "pubmed", &["a"]).await;
    let drafter = FakeDrafter::new(|| Err(CollabError::Malformed("reply is not JSON".into())));

    let report = run_extraction(&cache, &drafter, &ExtractionRequest::new("k")).await.unwrap();

    assert_eq!(report.extraction, placeholder_item());
    assert!(report.error.as_deref().is_some_and(|e| e.contains("reply is not JSON")));
    assert!(!report.problems.is_empty());
    let records = cache.list_extractions(Some(id), None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].content["error"].is_string());
  }

  #[tokio::test]
  async fn model_failure_records_nothing() {
    let (cache, id) = cache_with("k", "pubmed", &["a"]).await;
    let drafter = FakeDrafter::new(|| Err(CollabError::Model("503".into())));

    let err = run_extraction(&cache, &drafter, &ExtractionRequest::new("k")).await.unwrap_err();

    assert!(matches!(err, Error::Collab(CollabError::Model(_))));
    assert!(cache.list_extractions(Some(id), None).await.unwrap().is_empty());
  }
}
