//! Concept types: the nodes of the ontology being built.
//!
//! A [`Candidate`] is what a model extraction proposes; a [`ConceptEntry`] is
//! what the ontology keeps after merging. Both are keyed by a [`ConceptId`],
//! the folded form of a human-readable name.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

// ─── Identity ────────────────────────────────────────────────────────────────

/// Normalized concept identity.
///
/// Lowercases the name and folds every run of whitespace or punctuation into
/// a single `_`, so `"Subcapsular  Nest"`, `"subcapsular-nest"` and
/// `"subcapsular_nest"` all map to `subcapsular_nest`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConceptId(String);

impl ConceptId {
  /// Fold `name` into an identity. Returns `None` when nothing alphanumeric
  /// survives the folding.
  pub fn parse(name: &str) -> Option<Self> {
    let mut folded = String::with_capacity(name.len());
    let mut pending_sep = false;

    for ch in name.chars() {
      if ch.is_alphanumeric() {
        if pending_sep && !folded.is_empty() {
          folded.push('_');
        }
        pending_sep = false;
        folded.extend(ch.to_lowercase());
      } else {
        pending_sep = true;
      }
    }

    if folded.is_empty() { None } else { Some(Self(folded)) }
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ConceptId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Magnification ───────────────────────────────────────────────────────────

/// Objective power at which a concept is best recognised on a slide.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
)]
pub enum Magnification {
  #[serde(rename = "10x")]
  #[strum(serialize = "10x")]
  X10,
  #[serde(rename = "20x")]
  #[strum(serialize = "20x")]
  X20,
  #[serde(rename = "40x")]
  #[strum(serialize = "40x")]
  X40,
}

// ─── Evidence ────────────────────────────────────────────────────────────────

/// Provenance of a candidate: the title/url of the hit it was extracted from.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
pub struct EvidenceRef {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub url:   String,
}

impl EvidenceRef {
  pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
    Self { title: title.into(), url: url.into() }
  }

  pub fn is_empty(&self) -> bool { self.title.is_empty() && self.url.is_empty() }
}

// ─── Candidate ───────────────────────────────────────────────────────────────

/// A concept proposed by an extraction, before merging.
///
/// Field aliases accept the compact keys the extraction prompt asks for
/// (`name_snake`, `mags`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
  #[serde(alias = "name_snake")]
  pub name:           String,
  #[serde(alias = "mags", default)]
  pub magnifications: BTreeSet<Magnification>,
  #[serde(default)]
  pub text:           String,
  #[serde(default)]
  pub applies_to:     BTreeSet<String>,
  #[serde(default)]
  pub evidence:       EvidenceRef,
}

impl Candidate {
  /// Longest descriptive text accepted at the extraction boundary.
  pub const MAX_TEXT_CHARS: usize = 400;

  /// Convenience constructor with no classes and no evidence.
  pub fn new(
    name: impl Into<String>,
    magnifications: impl IntoIterator<Item = Magnification>,
    text: impl Into<String>,
  ) -> Self {
    Self {
      name:           name.into(),
      magnifications: magnifications.into_iter().collect(),
      text:           text.into(),
      applies_to:     BTreeSet::new(),
      evidence:       EvidenceRef::default(),
    }
  }

  pub fn with_classes<I, S>(mut self, classes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.applies_to = classes.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_evidence(mut self, evidence: EvidenceRef) -> Self {
    self.evidence = evidence;
    self
  }

  /// The identity this candidate merges into, if it has one.
  pub fn id(&self) -> Option<ConceptId> { ConceptId::parse(&self.name) }
}

// ─── Entry ───────────────────────────────────────────────────────────────────

/// A node of the ontology. Entries are never deleted, only extended through
/// [`crate::ontology::Ontology::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptEntry {
  pub id:             ConceptId,
  pub text:           String,
  pub magnifications: BTreeSet<Magnification>,
  pub applies_to:     BTreeSet<String>,
  pub evidence:       BTreeSet<EvidenceRef>,
}

impl ConceptEntry {
  pub(crate) fn from_candidate(id: ConceptId, candidate: Candidate) -> Self {
    let mut evidence = BTreeSet::new();
    if !candidate.evidence.is_empty() {
      evidence.insert(candidate.evidence);
    }
    Self {
      id,
      text: candidate.text.trim().to_owned(),
      magnifications: candidate.magnifications,
      applies_to: candidate.applies_to,
      evidence,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_folds_case_whitespace_and_punctuation() {
    let a = ConceptId::parse("Subcapsular  Nest").unwrap();
    let b = ConceptId::parse("subcapsular-nest").unwrap();
    let c = ConceptId::parse(" subcapsular_nest ").unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.as_str(), "subcapsular_nest");
  }

  #[test]
  fn identity_rejects_names_without_alphanumerics() {
    assert!(ConceptId::parse("").is_none());
    assert!(ConceptId::parse(" -- / ").is_none());
  }

  #[test]
  fn candidate_accepts_prompt_aliases() {
    let json = serde_json::json!({
      "name_snake": "nuclear_atypia",
      "mags": ["40x"],
      "text": "enlarged pleomorphic nuclei",
      "applies_to": ["tumor"],
      "evidence": { "title": "t", "url": "u" }
    });
    let candidate: Candidate = serde_json::from_value(json).unwrap();
    assert_eq!(candidate.name, "nuclear_atypia");
    assert!(candidate.magnifications.contains(&Magnification::X40));
    assert_eq!(candidate.evidence, EvidenceRef::new("t", "u"));
  }

  #[test]
  fn unknown_magnification_is_rejected() {
    let json = serde_json::json!({ "name": "x", "mags": ["5x"], "text": "t" });
    assert!(serde_json::from_value::<Candidate>(json).is_err());
  }

  #[test]
  fn magnification_display_matches_wire_form() {
    assert_eq!(Magnification::X20.to_string(), "20x");
    assert_eq!("40x".parse::<Magnification>().unwrap(), Magnification::X40);
  }
}
