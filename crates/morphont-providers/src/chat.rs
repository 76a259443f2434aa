//! [`ChatModel`]: planner, summarizer and extractor backed by an
//! OpenAI-compatible chat completions endpoint.

use morphont_core::{
  CollabError,
  collab::{
    ConceptExtractor, Evidence, Hit, QueryPlanner, SnapshotDrafter, Summarizer, Summary,
    parse_candidates, parse_draft_batch, parse_draft_item, parse_queries, parse_summary,
  },
  concept::Candidate,
};
use morphont_pipeline::{RateLimiter, RetryPolicy};
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use tracing::debug;

use crate::{Error, HttpFetcher, ModelConfig, Result, prompts, text::json_payload};

#[derive(Clone)]
pub struct ChatModel {
  http:        HttpFetcher,
  endpoint:    String,
  api_key:     String,
  model:       String,
  temperature: f32,
}

impl ChatModel {
  pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
    let api_key = api_key.into();
    if api_key.trim().is_empty() {
      return Err(Error::MissingApiKey);
    }
    let limiter = RateLimiter::new(RetryPolicy::from_config(&config.retry));
    Ok(Self {
      http: HttpFetcher::new(config.timeout(), limiter, HeaderMap::new())?,
      endpoint: config.completions_url(),
      api_key,
      model: config.model.clone(),
      temperature: config.temperature,
    })
  }

  pub fn model(&self) -> &str { &self.model }

  /// One system + user exchange; returns the assistant's text.
  pub async fn complete(&self, prompt: &str) -> Result<String, CollabError> {
    let body = json!({
      "model": self.model,
      "temperature": self.temperature,
      "messages": [
        { "role": "system", "content": prompts::SYSTEM },
        { "role": "user", "content": prompt },
      ],
    });

    let reply = self
      .http
      .post_json(&self.endpoint, &self.api_key, &body, parse_completion)
      .await
      .map_err(|e| match e.last {
        // the endpoint answered but the body is not a usable completion
        Error::Shape(_) | Error::Json(_) => CollabError::Malformed(e.to_string()),
        _ => CollabError::Model(e.to_string()),
      })?;
    debug!(model = %self.model, chars = reply.len(), "completion");
    Ok(reply)
  }

  async fn query_list(&self, prompt: &str) -> Result<Vec<String>, CollabError> {
    let value = json_payload(&self.complete(prompt).await?)?;
    if !value.is_array() {
      return Err(CollabError::Malformed("expected a JSON list of queries".into()));
    }
    Ok(parse_queries(&value))
  }
}

/// Assistant text of the first choice.
pub fn parse_completion(body: &[u8]) -> Result<String> {
  let value: Value = serde_json::from_slice(body)?;
  value["choices"][0]["message"]["content"]
    .as_str()
    .map(str::to_owned)
    .ok_or_else(|| Error::Shape("missing choices[0].message.content".into()))
}

impl QueryPlanner for ChatModel {
  async fn plan(&self, target: &str, tried: &[String]) -> Result<Vec<String>, CollabError> {
    self.query_list(&prompts::plan(target, tried)).await
  }

  async fn mutate(
    &self,
    _target: &str,
    tried: &[String],
    hints: &str,
  ) -> Result<Vec<String>, CollabError> {
    self.query_list(&prompts::mutate(tried, hints)).await
  }
}

impl Summarizer for ChatModel {
  async fn summarize(&self, hit: &Hit) -> Result<Summary, CollabError> {
    let snippet = if hit.snippet.trim().is_empty() { &hit.title } else { &hit.snippet };
    let reply = self.complete(&prompts::summarize(snippet)).await?;
    parse_summary(json_payload(&reply)?)
  }
}

impl ConceptExtractor for ChatModel {
  fn label(&self) -> &str { &self.model }

  async fn extract(
    &self,
    target: &str,
    evidence: &Evidence,
  ) -> Result<Vec<Candidate>, CollabError> {
    let summary = serde_json::to_string(&evidence.summary)
      .map_err(|e| CollabError::Malformed(e.to_string()))?;
    let reply = self
      .complete(&prompts::extract(target, &evidence.snippet, &summary))
      .await?;
    parse_candidates(json_payload(&reply)?)
  }
}

impl SnapshotDrafter for ChatModel {
  fn label(&self) -> &str { &self.model }

  async fn draft_item(
    &self,
    keyword: &str,
    source: &str,
    context: &str,
  ) -> Result<Value, CollabError> {
    let reply = self.complete(&prompts::draft_item(keyword, source, context)).await?;
    parse_draft_item(json_payload(&reply)?)
  }

  async fn draft_batch(
    &self,
    dataset: &str,
    classes: &Value,
    num_classes: Option<usize>,
  ) -> Result<Value, CollabError> {
    let classes = serde_json::to_string_pretty(classes)
      .map_err(|e| CollabError::Malformed(e.to_string()))?;
    let reply = self
      .complete(&prompts::draft_batch(dataset, &classes, num_classes))
      .await?;
    parse_draft_batch(json_payload(&reply)?)
  }
}
