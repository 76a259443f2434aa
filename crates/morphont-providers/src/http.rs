//! Rate-limited, retrying HTTP fetcher shared by every provider.

use std::time::Duration;

use morphont_pipeline::{RateLimiter, RetryError};
use reqwest::{Client, header::HeaderMap};
use serde_json::Value;

use crate::{
  Error, Result,
  error::into_attempt,
};

pub const USER_AGENT: &str = concat!("morphont/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in [`Error::Status`].
const ERROR_BODY_CHARS: usize = 500;

/// A [`reqwest::Client`] paired with the [`RateLimiter`] of its source.
///
/// Cheap to clone; clones share both the connection pool and the limiter.
#[derive(Clone)]
pub struct HttpFetcher {
  client:  Client,
  limiter: RateLimiter,
}

impl HttpFetcher {
  pub fn new(timeout: Duration, limiter: RateLimiter, headers: HeaderMap) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(USER_AGENT)
      .default_headers(headers)
      .build()?;
    Ok(Self { client, limiter })
  }

  pub fn limiter(&self) -> &RateLimiter { &self.limiter }

  /// `GET url?query` and decode the body with `decode`. The whole exchange,
  /// body read and decode included, is one attempt under the limiter.
  pub async fn get<T, D>(
    &self,
    url: &str,
    query: &[(&str, String)],
    decode: D,
  ) -> Result<T, RetryError<Error>>
  where
    D: Fn(&[u8]) -> Result<T> + Sync,
  {
    let client = &self.client;
    let decode = &decode;
    self
      .limiter
      .run(|| async move {
        let resp = client.get(url).query(query).send().await.map_err(into_attempt)?;
        read(resp, decode).await
      })
      .await
  }

  /// `POST url` with a JSON body and bearer token.
  pub async fn post_json<T, D>(
    &self,
    url: &str,
    bearer: &str,
    body: &Value,
    decode: D,
  ) -> Result<T, RetryError<Error>>
  where
    D: Fn(&[u8]) -> Result<T> + Sync,
  {
    let client = &self.client;
    let decode = &decode;
    self
      .limiter
      .run(|| async move {
        let resp = client
          .post(url)
          .bearer_auth(bearer)
          .json(body)
          .send()
          .await
          .map_err(into_attempt)?;
        read(resp, decode).await
      })
      .await
  }
}

async fn read<T, D>(
  resp: reqwest::Response,
  decode: &D,
) -> std::result::Result<T, morphont_pipeline::Attempt<Error>>
where
  D: Fn(&[u8]) -> Result<T>,
{
  let status = resp.status();
  let body = resp.bytes().await.map_err(into_attempt)?;
  if !status.is_success() {
    return Err(into_attempt(Error::Status {
      status: status.as_u16(),
      body:   String::from_utf8_lossy(&body).chars().take(ERROR_BODY_CHARS).collect(),
    }));
  }
  decode(&body).map_err(into_attempt)
}
