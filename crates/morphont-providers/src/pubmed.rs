//! PubMed via NCBI E-utilities: `esearch` for PMIDs, then `efetch` XML in
//! small batches for titles and abstracts.

use morphont_core::{CollabError, collab::{Hit, RetrievalClient}};
use morphont_pipeline::RetryError;
use quick_xml::{Reader, events::Event};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Error, HttpFetcher, Result, text::shorten};

pub const NCBI_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Abstract characters kept per hit.
const SNIPPET_CHARS: usize = 800;

#[derive(Clone)]
pub struct PubMedClient {
  http:       HttpFetcher,
  base_url:   String,
  batch_size: usize,
}

impl PubMedClient {
  pub fn new(http: HttpFetcher, batch_size: usize) -> Self {
    Self { http, base_url: NCBI_BASE.to_owned(), batch_size: batch_size.max(1) }
  }

  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into().trim_end_matches('/').to_owned();
    self
  }

  async fn esearch(&self, query: &str, cap: usize) -> Result<Vec<String>, RetryError<Error>> {
    self
      .http
      .get(
        &format!("{}/esearch.fcgi", self.base_url),
        &[
          ("db", "pubmed".into()),
          ("term", query.into()),
          ("retmode", "json".into()),
          ("retmax", cap.to_string()),
        ],
        parse_esearch,
      )
      .await
  }

  async fn efetch(&self, pmids: &[String]) -> Result<Vec<Hit>, RetryError<Error>> {
    self
      .http
      .get(
        &format!("{}/efetch.fcgi", self.base_url),
        &[
          ("db", "pubmed".into()),
          ("id", pmids.join(",")),
          ("retmode", "xml".into()),
        ],
        parse_efetch,
      )
      .await
  }
}

impl RetrievalClient for PubMedClient {
  fn source(&self) -> &str { "pubmed" }

  /// A failed fetch batch is logged and skipped; the search fails only when
  /// no batch succeeded.
  async fn search(&self, query: &str, cap: usize) -> Result<Vec<Hit>, CollabError> {
    let pmids = self.esearch(query, cap).await?;
    debug!(query, pmids = pmids.len(), "esearch");
    if pmids.is_empty() {
      return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    let mut last_failure = None;
    for batch in pmids.chunks(self.batch_size) {
      match self.efetch(batch).await {
        Ok(batch_hits) => hits.extend(batch_hits),
        Err(err) => {
          warn!(query, batch = ?batch, error = %err, "efetch batch failed");
          last_failure = Some(err);
        }
      }
    }

    if hits.is_empty()
      && let Some(err) = last_failure
    {
      return Err(err.into());
    }
    hits.truncate(cap);
    Ok(hits)
  }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// PMIDs from an `esearch` JSON reply. A reply without an id list yields
/// nothing.
pub fn parse_esearch(body: &[u8]) -> Result<Vec<String>> {
  let value: Value = serde_json::from_slice(body)?;
  let ids = value["esearchresult"]["idlist"]
    .as_array()
    .map(|ids| {
      ids
        .iter()
        .filter_map(|id| match id {
          Value::String(s) => Some(s.clone()),
          Value::Number(n) => Some(n.to_string()),
          _ => None,
        })
        .collect()
    })
    .unwrap_or_default();
  Ok(ids)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
  Pmid,
  Title,
  Abstract,
  Year,
}

#[derive(Default)]
struct Article {
  pmid:       String,
  title:      String,
  paragraphs: Vec<String>,
  year:       String,
}

impl Article {
  fn push(&mut self, field: Field, text: &str) {
    let target = match field {
      Field::Pmid => &mut self.pmid,
      Field::Title => &mut self.title,
      Field::Year => &mut self.year,
      Field::Abstract => match self.paragraphs.last_mut() {
        Some(p) => p,
        None => return,
      },
    };
    if !target.is_empty() {
      target.push(' ');
    }
    target.push_str(text.trim());
  }

  fn into_hit(self) -> Option<Hit> {
    let paragraphs: Vec<_> = self
      .paragraphs
      .into_iter()
      .filter(|p| !p.trim().is_empty())
      .collect();
    let snippet = shorten(&paragraphs.join(" "), SNIPPET_CHARS);
    let title = self.title.trim().to_owned();
    if title.is_empty() && snippet.is_empty() {
      return None;
    }

    let url = if self.pmid.is_empty() {
      String::new()
    } else {
      format!("https://pubmed.ncbi.nlm.nih.gov/{}/", self.pmid)
    };
    Some(Hit { title, snippet, url, published: self.year, license: String::new() })
  }
}

/// Hits from an `efetch` `PubmedArticleSet` document. Articles with neither
/// title nor abstract are skipped.
pub fn parse_efetch(xml: &[u8]) -> Result<Vec<Hit>> {
  let mut reader = Reader::from_reader(xml);
  reader.config_mut().trim_text(true);

  let mut hits = Vec::new();
  let mut article: Option<Article> = None;
  let mut field: Option<Field> = None;
  let mut in_pub_date = false;
  let mut buf = Vec::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => match e.name().as_ref() {
        b"PubmedArticle" => article = Some(Article::default()),
        b"PMID" if article.as_ref().is_some_and(|a| a.pmid.is_empty()) => {
          field = Some(Field::Pmid);
        }
        b"ArticleTitle" => field = Some(Field::Title),
        b"AbstractText" => {
          if let Some(a) = article.as_mut() {
            a.paragraphs.push(String::new());
          }
          field = Some(Field::Abstract);
        }
        b"PubDate" => in_pub_date = true,
        b"Year" if in_pub_date => field = Some(Field::Year),
        _ => {}
      },
      Ok(Event::Text(ref t)) => {
        if let (Some(f), Some(a)) = (field, article.as_mut()) {
          let text = t.unescape().map_err(|e| Error::Xml(e.to_string()))?;
          a.push(f, &text);
        }
      }
      Ok(Event::CData(ref c)) => {
        if let (Some(f), Some(a)) = (field, article.as_mut()) {
          a.push(f, &String::from_utf8_lossy(c));
        }
      }
      Ok(Event::End(ref e)) => match e.name().as_ref() {
        b"PMID" | b"ArticleTitle" | b"AbstractText" | b"Year" => field = None,
        b"PubDate" => in_pub_date = false,
        b"PubmedArticle" => {
          if let Some(hit) = article.take().and_then(Article::into_hit) {
            hits.push(hit);
          }
        }
        _ => {}
      },
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Xml(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  Ok(hits)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use morphont_pipeline::{RateLimiter, RetryPolicy};
  use reqwest::header::HeaderMap;

  use super::*;
  use crate::test_server::{json, response, serve};

  const EFETCH: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">31000001</PMID>
      <Article>
        <Journal><JournalIssue><PubDate><Year>2019</Year><Month>Jan</Month></PubDate></JournalIssue></Journal>
        <ArticleTitle>Subcapsular sinus metastasis in <i>breast</i> carcinoma.</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Cohesive nests &amp; clusters.</AbstractText>
          <AbstractText Label="RESULTS">Nuclear atypia at high power.</AbstractText>
        </Abstract>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID Version="1">99999999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation><PMID Version="1">31000002</PMID><Article></Article></MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

  #[test]
  fn efetch_articles_become_hits() {
    let hits = parse_efetch(EFETCH.as_bytes()).unwrap();
    assert_eq!(hits.len(), 1);

    let hit = &hits[0];
    assert_eq!(hit.title, "Subcapsular sinus metastasis in breast carcinoma.");
    assert_eq!(hit.snippet, "Cohesive nests & clusters. Nuclear atypia at high power.");
    assert_eq!(hit.url, "https://pubmed.ncbi.nlm.nih.gov/31000001/");
    assert_eq!(hit.published, "2019");
  }

  #[test]
  fn long_abstracts_are_shortened() {
    let body = format!(
      "<PubmedArticleSet><PubmedArticle><PMID>1</PMID><ArticleTitle>t</ArticleTitle>\
       <AbstractText>{}</AbstractText></PubmedArticle></PubmedArticleSet>",
      "word ".repeat(400)
    );
    let hits = parse_efetch(body.as_bytes()).unwrap();
    assert!(hits[0].snippet.chars().count() <= SNIPPET_CHARS);
    assert!(hits[0].snippet.ends_with("..."));
  }

  #[test]
  fn broken_xml_is_an_error() {
    assert!(parse_efetch(b"<PubmedArticleSet><PubmedArticle></Oops>").is_err());
  }

  #[test]
  fn esearch_ids_are_read_as_strings() {
    let body = br#"{"esearchresult": {"count": "2", "idlist": ["31000001", 31000002]}}"#;
    assert_eq!(parse_esearch(body).unwrap(), vec!["31000001", "31000002"]);
    assert!(parse_esearch(br#"{"error": "x"}"#).unwrap().is_empty());
  }

  // ─── Over HTTP ───────────────────────────────────────────────────────────

  fn client(base_url: &str, batch_size: usize) -> PubMedClient {
    let policy = RetryPolicy {
      max_retries: 0,
      base_delay:  Duration::from_millis(1),
      max_backoff: Duration::from_millis(1),
    };
    let http =
      HttpFetcher::new(Duration::from_secs(5), RateLimiter::new(policy), HeaderMap::new()).unwrap();
    PubMedClient::new(http, batch_size).with_base_url(base_url)
  }

  fn article(pmid: &str) -> String {
    format!(
      "<PubmedArticle><PMID>{pmid}</PMID><ArticleTitle>Article {pmid}</ArticleTitle>\
       <AbstractText>Abstract {pmid}.</AbstractText></PubmedArticle>"
    )
  }

  fn efetch_ok(pmids: &[&str]) -> String {
    let body: String = pmids.iter().map(|p| article(p)).collect();
    response("200 OK", "text/xml", &format!("<PubmedArticleSet>{body}</PubmedArticleSet>"))
  }

  #[tokio::test]
  async fn failed_batches_are_skipped() {
    let server = serve(vec![
      json(r#"{"esearchresult": {"idlist": ["1", "2", "3"]}}"#),
      efetch_ok(&["1", "2"]),
      response("400 Bad Request", "text/plain", "bad id"),
    ])
    .await;

    let hits = client(&server.url, 2).search("nodal metastasis", 5).await.unwrap();

    let titles: Vec<_> = hits.iter().map(|h| h.title.as_str()).collect();
    assert_eq!(titles, ["Article 1", "Article 2"]);
    assert_eq!(server.served(), 3);
    assert!(server.requests()[1].contains("id=1%2C2"));
  }

  #[tokio::test]
  async fn search_fails_when_every_batch_fails() {
    let server = serve(vec![
      json(r#"{"esearchresult": {"idlist": ["1"]}}"#),
      response("400 Bad Request", "text/plain", "bad id"),
    ])
    .await;

    let err = client(&server.url, 4).search("q", 5).await.unwrap_err();
    assert!(matches!(err, CollabError::Retrieval { attempts: 1, .. }));
  }

  #[tokio::test]
  async fn no_pmids_means_no_fetch() {
    let server = serve(vec![json(r#"{"esearchresult": {"idlist": []}}"#)]).await;

    assert!(client(&server.url, 4).search("q", 5).await.unwrap().is_empty());
    assert_eq!(server.served(), 1);
  }
}
