//! Provider configuration, deserialised by the binary.

use std::time::Duration;

use morphont_pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

/// Literature source used for retrieval.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Source {
  #[default]
  #[serde(rename = "pubmed")]
  #[strum(serialize = "pubmed")]
  PubMed,
  EuropePmc,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
  #[serde(default)]
  pub source:       Source,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// PMIDs per PubMed fetch request.
  #[serde(default = "default_batch_size")]
  pub batch_size:   usize,
  /// Sent as `From:` to NCBI when set.
  #[serde(default)]
  pub ncbi_email:   Option<String>,
  #[serde(default)]
  pub ncbi_api_key: Option<String>,
  #[serde(default)]
  pub retry:        RetryConfig,
}

fn default_timeout_secs() -> u64 { 30 }
fn default_batch_size() -> usize { 4 }

impl RetrievalConfig {
  pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

impl Default for RetrievalConfig {
  fn default() -> Self {
    Self {
      source:       Source::default(),
      timeout_secs: default_timeout_secs(),
      batch_size:   default_batch_size(),
      ncbi_email:   None,
      ncbi_api_key: None,
      retry:        RetryConfig::default(),
    }
  }
}

/// OpenAI-compatible chat endpoint settings. The API key is supplied
/// separately so it never has to live in a config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
  #[serde(default = "default_api_base")]
  pub api_base:     String,
  #[serde(default = "default_model")]
  pub model:        String,
  #[serde(default = "default_temperature")]
  pub temperature:  f32,
  #[serde(default = "default_model_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_model_retry")]
  pub retry:        RetryConfig,
}

fn default_api_base() -> String { "https://api.openai.com/v1".to_owned() }
fn default_model() -> String { "gpt-4o-mini".to_owned() }
fn default_temperature() -> f32 { 0.2 }
fn default_model_timeout_secs() -> u64 { 60 }
fn default_model_retry() -> RetryConfig {
  RetryConfig { min_delay_ms: 250, ..RetryConfig::default() }
}

impl ModelConfig {
  pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }

  pub fn completions_url(&self) -> String {
    format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
  }
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      api_base:     default_api_base(),
      model:        default_model(),
      temperature:  default_temperature(),
      timeout_secs: default_model_timeout_secs(),
      retry:        default_model_retry(),
    }
  }
}
