//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that lexical order matches chronological order. Argument and
//! payload blobs are stored as compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use morphont_core::cache::{
  ExtractionRecord, ResultItem, ResultRecord, SearchId, SearchRecord,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── JSON ────────────────────────────────────────────────────────────────────

pub fn encode_json(value: &serde_json::Value) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json(s: &str) -> Result<serde_json::Value> {
  Ok(serde_json::from_str(s)?)
}

// ─── Integers ────────────────────────────────────────────────────────────────

pub fn decode_count(n: i64) -> Result<usize> {
  usize::try_from(n).map_err(|_| Error::InvalidValue(format!("negative count: {n}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `searches` row.
pub struct RawSearch {
  pub id:           i64,
  pub keyword:      String,
  pub source:       String,
  pub tool_name:    String,
  pub max_results:  i64,
  pub args_json:    String,
  pub requested_at: String,
}

impl RawSearch {
  pub const COLUMNS: &'static str =
    "id, keyword, source, tool_name, max_results, args_json, requested_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      keyword:      row.get(1)?,
      source:       row.get(2)?,
      tool_name:    row.get(3)?,
      max_results:  row.get(4)?,
      args_json:    row.get(5)?,
      requested_at: row.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<SearchRecord> {
    let max_results = u32::try_from(self.max_results).map_err(|_| {
      Error::InvalidValue(format!("max_results out of range: {}", self.max_results))
    })?;
    Ok(SearchRecord {
      id: self.id,
      keyword: self.keyword,
      source: self.source,
      tool: self.tool_name,
      max_results,
      args: decode_json(&self.args_json)?,
      requested_at: decode_dt(&self.requested_at)?,
    })
  }
}

/// Raw values read directly from a `results` row.
pub struct RawResult {
  pub search_id:    SearchId,
  pub title:        String,
  pub url:          String,
  pub published:    String,
  pub license:      String,
  pub snippet:      String,
  pub payload_json: String,
}

impl RawResult {
  pub const COLUMNS: &'static str =
    "search_id, title, url, published, license, snippet, payload_json";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      search_id:    row.get(0)?,
      title:        row.get(1)?,
      url:          row.get(2)?,
      published:    row.get(3)?,
      license:      row.get(4)?,
      snippet:      row.get(5)?,
      payload_json: row.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<ResultRecord> {
    Ok(ResultRecord {
      search_id: self.search_id,
      item:      ResultItem {
        title:     self.title,
        url:       self.url,
        published: self.published,
        license:   self.license,
        snippet:   self.snippet,
        payload:   decode_json(&self.payload_json)?,
      },
    })
  }
}

/// Raw values read directly from an `extractions` row.
pub struct RawExtraction {
  pub id:           i64,
  pub search_id:    SearchId,
  pub extractor:    String,
  pub keyword:      String,
  pub content_json: String,
  pub created_at:   String,
}

impl RawExtraction {
  pub const COLUMNS: &'static str =
    "id, search_id, extractor, keyword, content_json, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      search_id:    row.get(1)?,
      extractor:    row.get(2)?,
      keyword:      row.get(3)?,
      content_json: row.get(4)?,
      created_at:   row.get(5)?,
    })
  }

  pub fn into_record(self) -> Result<ExtractionRecord> {
    Ok(ExtractionRecord {
      id:         self.id,
      search_id:  self.search_id,
      extractor:  self.extractor,
      keyword:    self.keyword,
      content:    decode_json(&self.content_json)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
