//! Europe PMC REST search.

use morphont_core::{CollabError, collab::{Hit, RetrievalClient}};
use serde_json::Value;
use tracing::debug;

use crate::{
  HttpFetcher, Result,
  text::{shorten, strip_tags},
};

pub const EUROPE_PMC_SEARCH: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";

const SNIPPET_CHARS: usize = 800;

#[derive(Clone)]
pub struct EuropePmcClient {
  http: HttpFetcher,
  url:  String,
}

impl EuropePmcClient {
  pub fn new(http: HttpFetcher) -> Self { Self { http, url: EUROPE_PMC_SEARCH.to_owned() } }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = url.into();
    self
  }
}

impl RetrievalClient for EuropePmcClient {
  fn source(&self) -> &str { "europe_pmc" }

  async fn search(&self, query: &str, cap: usize) -> Result<Vec<Hit>, CollabError> {
    let mut hits = self
      .http
      .get(
        &self.url,
        &[
          ("query", query.into()),
          ("format", "json".into()),
          ("resultType", "core".into()),
          ("pageSize", cap.to_string()),
        ],
        parse_search,
      )
      .await?;
    hits.truncate(cap);
    debug!(query, hits = hits.len(), "europe pmc search");
    Ok(hits)
  }
}

fn string_field(entry: &Value, key: &str) -> String {
  match &entry[key] {
    Value::String(s) => s.trim().to_owned(),
    Value::Number(n) => n.to_string(),
    _ => String::new(),
  }
}

/// Landing page for a record: PMC article, else MEDLINE abstract.
fn record_url(entry: &Value) -> String {
  let pmcid = string_field(entry, "pmcid");
  if !pmcid.is_empty() {
    return format!("https://europepmc.org/article/PMC/{pmcid}");
  }
  let pmid = string_field(entry, "pmid");
  if !pmid.is_empty() {
    return format!("https://europepmc.org/abstract/MED/{pmid}");
  }
  string_field(entry, "url")
}

/// Hits from a `resultList` reply. The snippet is the abstract with markup
/// removed, or the title when there is no abstract.
pub fn parse_search(body: &[u8]) -> Result<Vec<Hit>> {
  let value: Value = serde_json::from_slice(body)?;
  let Some(entries) = value["resultList"]["result"].as_array() else {
    return Ok(Vec::new());
  };

  Ok(
    entries
      .iter()
      .map(|entry| {
        let title = string_field(entry, "title");
        let abstract_text = strip_tags(&string_field(entry, "abstractText"));
        let published = Some(string_field(entry, "firstPublicationDate"))
          .filter(|s| !s.is_empty())
          .unwrap_or_else(|| string_field(entry, "pubYear"));
        let snippet_source = if abstract_text.is_empty() { &title } else { &abstract_text };

        Hit {
          snippet: shorten(snippet_source, SNIPPET_CHARS),
          url: record_url(entry),
          published,
          license: string_field(entry, "license"),
          title,
        }
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn records_map_to_hits() {
    let body = br#"{
      "hitCount": 3,
      "resultList": {"result": [
        {"title": "Nodal metastasis", "pmcid": "PMC123", "pmid": "1",
         "abstractText": "<h4>Background</h4>Capsular <i>nests</i>.",
         "firstPublicationDate": "2020-02-01", "license": "cc by"},
        {"title": "Only title", "pmid": "42", "pubYear": "2011"},
        {"title": "No ids"}
      ]}
    }"#;

    let hits = parse_search(body).unwrap();
    assert_eq!(hits.len(), 3);

    assert_eq!(hits[0].url, "https://europepmc.org/article/PMC/PMC123");
    assert_eq!(hits[0].snippet, "Background Capsular nests .");
    assert_eq!(hits[0].published, "2020-02-01");
    assert_eq!(hits[0].license, "cc by");

    assert_eq!(hits[1].url, "https://europepmc.org/abstract/MED/42");
    assert_eq!(hits[1].snippet, "Only title");
    assert_eq!(hits[1].published, "2011");

    assert!(hits[2].url.is_empty());
  }

  #[test]
  fn missing_result_list_is_empty() {
    assert!(parse_search(br#"{"hitCount": 0}"#).unwrap().is_empty());
  }
}
