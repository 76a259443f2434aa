//! [`LiteratureClient`]: the configured retrieval source.

use morphont_core::{CollabError, collab::{Hit, RetrievalClient}};
use morphont_pipeline::{RateLimiter, RetryPolicy};
use reqwest::header::{FROM, HeaderMap, HeaderName, HeaderValue};

use crate::{
  Error, EuropePmcClient, HttpFetcher, PubMedClient, Result, RetrievalConfig, Source,
};

pub enum LiteratureClient {
  PubMed(PubMedClient),
  EuropePmc(EuropePmcClient),
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
  HeaderValue::from_str(value).map_err(|e| Error::Config(format!("{name}: {e}")))
}

impl LiteratureClient {
  /// Build the client for `config.source` with its own rate limiter.
  pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
    let limiter = RateLimiter::new(RetryPolicy::from_config(&config.retry));

    match config.source {
      Source::PubMed => {
        let mut headers = HeaderMap::new();
        if let Some(email) = config.ncbi_email.as_deref().filter(|e| !e.is_empty()) {
          headers.insert(FROM, header_value("ncbi_email", email)?);
        }
        if let Some(key) = config.ncbi_api_key.as_deref().filter(|k| !k.is_empty()) {
          headers.insert(HeaderName::from_static("api-key"), header_value("ncbi_api_key", key)?);
        }
        let http = HttpFetcher::new(config.timeout(), limiter, headers)?;
        Ok(Self::PubMed(PubMedClient::new(http, config.batch_size)))
      }
      Source::EuropePmc => {
        let http = HttpFetcher::new(config.timeout(), limiter, HeaderMap::new())?;
        Ok(Self::EuropePmc(EuropePmcClient::new(http)))
      }
    }
  }
}

impl RetrievalClient for LiteratureClient {
  fn source(&self) -> &str {
    match self {
      Self::PubMed(c) => c.source(),
      Self::EuropePmc(c) => c.source(),
    }
  }

  async fn search(&self, query: &str, cap: usize) -> Result<Vec<Hit>, CollabError> {
    match self {
      Self::PubMed(c) => c.search(query, cap).await,
      Self::EuropePmc(c) => c.search(query, cap).await,
    }
  }
}
