//! SQLite backend for the morphont search cache.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Writes from concurrent tasks are
//! serialized on that thread; result uniqueness is enforced by the schema.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteCache;
