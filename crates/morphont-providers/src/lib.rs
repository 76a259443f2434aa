//! Network-backed collaborators for `morphont`.
//!
//! Two literature sources ([`PubMedClient`], [`EuropePmcClient`]) implement
//! [`morphont_core::collab::RetrievalClient`]; [`ChatModel`] talks to an
//! OpenAI-compatible chat completions endpoint and implements the planner,
//! summarizer and extractor traits. All HTTP goes through one rate-limited,
//! retrying fetcher per collaborator.

pub mod chat;
pub mod config;
pub mod error;
pub mod europe_pmc;
pub mod http;
pub mod literature;
mod prompts;
pub mod pubmed;
pub mod text;

#[cfg(test)]
mod test_server;

pub use chat::ChatModel;
pub use config::{ModelConfig, RetrievalConfig, Source};
pub use error::{Error, Result};
pub use europe_pmc::EuropePmcClient;
pub use http::HttpFetcher;
pub use literature::LiteratureClient;
pub use pubmed::PubMedClient;
