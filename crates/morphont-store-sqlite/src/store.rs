//! [`SqliteCache`]: the SQLite implementation of [`SearchCache`].

use std::{collections::BTreeMap, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tracing::debug;

use morphont_core::cache::{
  ExtractionId, ExtractionRecord, KeywordBundle, NewExtraction, NewSearch,
  ResultItem, SearchBundle, SearchCache, SearchId, SearchRecord,
};

use crate::{
  Result,
  encode::{
    RawExtraction, RawResult, RawSearch, decode_count, encode_dt, encode_json,
  },
  schema::SCHEMA,
};

// ─── Row helpers ─────────────────────────────────────────────────────────────

fn query_results(
  conn: &rusqlite::Connection,
  search_id: SearchId,
) -> rusqlite::Result<Vec<RawResult>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM results WHERE search_id = ?1 ORDER BY id ASC",
    RawResult::COLUMNS
  ))?;
  stmt
    .query_map(rusqlite::params![search_id], RawResult::from_row)?
    .collect()
}

fn query_extractions(
  conn: &rusqlite::Connection,
  search_id: Option<SearchId>,
  keyword: Option<&str>,
) -> rusqlite::Result<Vec<RawExtraction>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM extractions
     WHERE (?1 IS NULL OR search_id = ?1)
       AND (?2 IS NULL OR keyword = ?2)
     ORDER BY created_at DESC, id DESC",
    RawExtraction::COLUMNS
  ))?;
  stmt
    .query_map(rusqlite::params![search_id, keyword], RawExtraction::from_row)?
    .collect()
}

fn query_searches(
  conn: &rusqlite::Connection,
  keyword: &str,
  source: Option<&str>,
  limit: Option<i64>,
) -> rusqlite::Result<Vec<RawSearch>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM searches
     WHERE keyword = ?1
       AND (?2 IS NULL OR source = ?2)
     ORDER BY requested_at DESC, id DESC
     LIMIT ?3",
    RawSearch::COLUMNS
  ))?;
  stmt
    .query_map(
      rusqlite::params![keyword, source, limit.unwrap_or(-1)],
      RawSearch::from_row,
    )?
    .collect()
}

/// Raw rows for one search bundle, read under a single connection call.
type RawBundle = (RawSearch, Option<Vec<RawResult>>, Option<Vec<RawExtraction>>);

fn into_bundle((search, results, extractions): RawBundle) -> Result<SearchBundle> {
  Ok(SearchBundle {
    search:      search.into_record()?,
    results:     results
      .map(|rows| rows.into_iter().map(RawResult::into_record).collect())
      .transpose()?,
    extractions: extractions
      .map(|rows| rows.into_iter().map(RawExtraction::into_record).collect())
      .transpose()?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A search cache backed by a single SQLite file.
///
/// Clones share one reference-counted connection.
#[derive(Clone)]
pub struct SqliteCache {
  conn: tokio_rusqlite::Connection,
}

impl SqliteCache {
  /// Open (or create) a cache at `path`, creating parent directories, and
  /// run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let cache = Self { conn };
    cache.init_schema().await?;
    Ok(cache)
  }

  /// Open an in-memory cache.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let cache = Self { conn };
    cache.init_schema().await?;
    Ok(cache)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── SearchCache impl ────────────────────────────────────────────────────────

impl SearchCache for SqliteCache {
  type Error = crate::Error;

  // ── Append-only writes ────────────────────────────────────────────────────

  async fn record_search(&self, search: NewSearch) -> Result<SearchId> {
    let args_json = encode_json(&search.args)?;
    let at_str = encode_dt(Utc::now());
    let max_results = i64::from(search.max_results);
    let NewSearch { keyword, source, tool, .. } = search;

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO searches
             (keyword, source, tool_name, max_results, args_json, requested_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![keyword, source, tool, max_results, args_json, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    debug!(search_id = id, "recorded search");
    Ok(id)
  }

  async fn record_results(
    &self,
    search_id: SearchId,
    items: Vec<ResultItem>,
  ) -> Result<usize> {
    if items.is_empty() {
      return Ok(0);
    }

    let rows = items
      .into_iter()
      .map(|item| {
        let payload = encode_json(&item.payload)?;
        Ok((item.title, item.url, item.published, item.license, item.snippet, payload))
      })
      .collect::<Result<Vec<_>>>()?;
    let offered = rows.len();

    let added = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut added = 0;
        {
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO results
               (search_id, title, url, published, license, snippet, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for (title, url, published, license, snippet, payload) in &rows {
            added += stmt.execute(rusqlite::params![
              search_id, title, url, published, license, snippet, payload,
            ])?;
          }
        }
        tx.commit()?;
        Ok(added)
      })
      .await?;

    debug!(search_id, offered, added, "recorded results");
    Ok(added)
  }

  async fn record_extraction(&self, extraction: NewExtraction) -> Result<ExtractionId> {
    let content_json = encode_json(&extraction.content)?;
    let at_str = encode_dt(Utc::now());
    let NewExtraction { search_id, extractor, keyword, .. } = extraction;

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO extractions
             (search_id, extractor, keyword, content_json, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![search_id, extractor, keyword, content_json, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    debug!(search_id, extraction_id = id, "recorded extraction");
    Ok(id)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn fetch_by_keyword(
    &self,
    keyword: &str,
    source: Option<&str>,
  ) -> Result<KeywordBundle> {
    let keyword_owned = keyword.to_owned();
    let source_owned = source.map(str::to_owned);

    let raws: Vec<RawBundle> = self
      .conn
      .call(move |conn| {
        let searches =
          query_searches(conn, &keyword_owned, source_owned.as_deref(), None)?;
        let mut bundles = Vec::with_capacity(searches.len());
        for search in searches {
          let results = query_results(conn, search.id)?;
          let extractions = query_extractions(conn, Some(search.id), None)?;
          bundles.push((search, Some(results), Some(extractions)));
        }
        Ok(bundles)
      })
      .await?;

    let mut sources: BTreeMap<String, Vec<SearchBundle>> = BTreeMap::new();
    for raw in raws {
      let bundle = into_bundle(raw)?;
      sources
        .entry(bundle.search.source.clone())
        .or_default()
        .push(bundle);
    }

    Ok(KeywordBundle { keyword: keyword.to_owned(), sources })
  }

  async fn fetch_by_search_id(
    &self,
    search_id: SearchId,
    include_results: bool,
    include_extractions: bool,
  ) -> Result<Option<SearchBundle>> {
    let raw: Option<RawBundle> = self
      .conn
      .call(move |conn| {
        let search = conn
          .query_row(
            &format!("SELECT {} FROM searches WHERE id = ?1", RawSearch::COLUMNS),
            rusqlite::params![search_id],
            RawSearch::from_row,
          )
          .optional()?;

        let Some(search) = search else { return Ok(None) };

        let results = include_results
          .then(|| query_results(conn, search_id))
          .transpose()?;
        let extractions = include_extractions
          .then(|| query_extractions(conn, Some(search_id), None))
          .transpose()?;

        Ok(Some((search, results, extractions)))
      })
      .await?;

    raw.map(into_bundle).transpose()
  }

  async fn latest_search(
    &self,
    keyword: &str,
    source: Option<&str>,
  ) -> Result<Option<SearchRecord>> {
    let keyword = keyword.to_owned();
    let source = source.map(str::to_owned);

    let raw: Option<RawSearch> = self
      .conn
      .call(move |conn| {
        Ok(query_searches(conn, &keyword, source.as_deref(), Some(1))?.pop())
      })
      .await?;

    raw.map(RawSearch::into_record).transpose()
  }

  async fn list_extractions(
    &self,
    search_id: Option<SearchId>,
    keyword: Option<&str>,
  ) -> Result<Vec<ExtractionRecord>> {
    let keyword = keyword.map(str::to_owned);

    let raws: Vec<RawExtraction> = self
      .conn
      .call(move |conn| Ok(query_extractions(conn, search_id, keyword.as_deref())?))
      .await?;

    raws.into_iter().map(RawExtraction::into_record).collect()
  }

  async fn count_results(&self, search_id: SearchId) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM results WHERE search_id = ?1",
          rusqlite::params![search_id],
          |r| r.get(0),
        )?)
      })
      .await?;
    decode_count(n)
  }

  async fn delete_search(&self, search_id: SearchId) -> Result<bool> {
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM searches WHERE id = ?1", rusqlite::params![search_id])?)
      })
      .await?;

    debug!(search_id, removed, "deleted search");
    Ok(removed > 0)
  }
}
