//! SQL schema for the morphont search cache.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! layout so later migrations can be gated on it.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per retrieval call. Never deduplicated.
CREATE TABLE IF NOT EXISTS searches (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword      TEXT    NOT NULL,
    source       TEXT    NOT NULL,
    tool_name    TEXT    NOT NULL,
    max_results  INTEGER NOT NULL,
    args_json    TEXT    NOT NULL,
    requested_at TEXT    NOT NULL   -- RFC 3339 UTC; cache-assigned
);

-- Items returned by a call; identical items within one call collapse.
CREATE TABLE IF NOT EXISTS results (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    search_id    INTEGER NOT NULL REFERENCES searches(id) ON DELETE CASCADE,
    title        TEXT    NOT NULL DEFAULT '',
    url          TEXT    NOT NULL DEFAULT '',
    published    TEXT    NOT NULL DEFAULT '',
    license      TEXT    NOT NULL DEFAULT '',
    snippet      TEXT    NOT NULL DEFAULT '',
    payload_json TEXT    NOT NULL DEFAULT 'null',
    UNIQUE (search_id, title, url)
);

-- Extraction artifacts are append-only.
CREATE TABLE IF NOT EXISTS extractions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    search_id    INTEGER NOT NULL REFERENCES searches(id) ON DELETE CASCADE,
    extractor    TEXT    NOT NULL,
    keyword      TEXT    NOT NULL,
    content_json TEXT    NOT NULL,
    created_at   TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_searches_keyword_source ON searches(keyword, source);
CREATE INDEX IF NOT EXISTS idx_results_search_id       ON results(search_id);
CREATE INDEX IF NOT EXISTS idx_extractions_search_id   ON extractions(search_id);

PRAGMA user_version = 1;
";
