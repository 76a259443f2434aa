//! Core types and trait definitions for the morphont ontology builder.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! cache backend, the retrieval clients and the language-model collaborators
//! all live in other crates and are reached through the traits defined here.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod collab;
pub mod concept;
pub mod error;
pub mod ontology;
pub mod snapshot;

pub use error::{CollabError, Error, Result};
