//! The cumulative ontology map and its merge rule.
//!
//! Every mutation of a [`ConceptEntry`] goes through [`Ontology::merge`]. The
//! rule is a set union on magnifications, classes and evidence plus a
//! comparison-based text choice, which makes merging idempotent and
//! independent of candidate order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::concept::{Candidate, ConceptEntry, ConceptId};

/// Outcome of folding one batch of candidates into the ontology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
  /// Identities created or changed by this batch.
  pub delta:    BTreeSet<ConceptId>,
  /// Candidates dropped for lacking a name, text or magnification.
  pub rejected: usize,
}

/// Ontology map keyed by normalized concept identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ontology {
  pub concepts: BTreeMap<ConceptId, ConceptEntry>,
}

impl Ontology {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.concepts.len() }

  pub fn is_empty(&self) -> bool { self.concepts.is_empty() }

  pub fn get(&self, id: &ConceptId) -> Option<&ConceptEntry> {
    self.concepts.get(id)
  }

  /// Fold `candidates` into the map, one at a time, in iteration order.
  pub fn merge<I>(&mut self, candidates: I) -> MergeReport
  where
    I: IntoIterator<Item = Candidate>,
  {
    let mut report = MergeReport::default();
    for candidate in candidates {
      match self.merge_one(candidate) {
        Some((id, true)) => {
          report.delta.insert(id);
        }
        Some((_, false)) => {}
        None => report.rejected += 1,
      }
    }
    report
  }

  /// Merge a single candidate. Returns the identity and whether the map
  /// changed, or `None` if the candidate was rejected.
  fn merge_one(&mut self, candidate: Candidate) -> Option<(ConceptId, bool)> {
    let id = candidate.id()?;
    if candidate.text.trim().is_empty() || candidate.magnifications.is_empty() {
      return None;
    }

    let Some(entry) = self.concepts.get_mut(&id) else {
      let entry = ConceptEntry::from_candidate(id.clone(), candidate);
      self.concepts.insert(id.clone(), entry);
      return Some((id, true));
    };

    let before = entry.clone();

    entry.magnifications.extend(candidate.magnifications);
    entry.applies_to.extend(candidate.applies_to);
    if !candidate.evidence.is_empty() {
      entry.evidence.insert(candidate.evidence);
    }
    let text = candidate.text.trim();
    if prefers(text, &entry.text) {
      entry.text = text.to_owned();
    }

    let changed = *entry != before;
    Some((id, changed))
  }

  /// The entries named by `delta`, for per-iteration persistence.
  pub fn slice<'a>(
    &'a self,
    delta: &'a BTreeSet<ConceptId>,
  ) -> BTreeMap<&'a ConceptId, &'a ConceptEntry> {
    delta
      .iter()
      .filter_map(|id| self.concepts.get_key_value(id))
      .collect()
  }
}

/// Whether `candidate` should replace `current`: the shorter non-empty text
/// wins, equal lengths fall back to lexicographic order.
fn prefers(candidate: &str, current: &str) -> bool {
  if candidate.is_empty() {
    return false;
  }
  if current.is_empty() {
    return true;
  }
  let key = |s: &str| (s.chars().count(), s.to_owned());
  key(candidate) < key(current)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::concept::{EvidenceRef, Magnification};

  fn cand(name: &str, mag: Magnification, text: &str) -> Candidate {
    Candidate::new(name, [mag], text)
  }

  #[test]
  fn new_identity_is_inserted_and_reported() {
    let mut onto = Ontology::new();
    let report = onto.merge([cand("Tumor Nest", Magnification::X20, "nests")]);
    assert_eq!(onto.len(), 1);
    assert_eq!(report.delta.len(), 1);
    assert_eq!(report.rejected, 0);
  }

  #[test]
  fn incomplete_candidates_are_dropped() {
    let mut onto = Ontology::new();
    let report = onto.merge([
      cand("", Magnification::X10, "text"),
      cand("a", Magnification::X10, "   "),
      Candidate::new("b", [], "text"),
    ]);
    assert!(onto.is_empty());
    assert!(report.delta.is_empty());
    assert_eq!(report.rejected, 3);
  }

  #[test]
  fn shorter_text_wins_and_sticks() {
    let mut onto = Ontology::new();
    onto.merge([cand("necrosis", Magnification::X10, "0123456789")]);
    onto.merge([cand("necrosis", Magnification::X10, "abcde")]);
    onto.merge([cand("necrosis", Magnification::X10, "abcdefgh")]);

    let id = ConceptId::parse("necrosis").unwrap();
    assert_eq!(onto.get(&id).unwrap().text, "abcde");
  }

  #[test]
  fn sets_are_unioned() {
    let mut onto = Ontology::new();
    onto.merge([
      cand("stroma", Magnification::X10, "collagen")
        .with_classes(["normal"])
        .with_evidence(EvidenceRef::new("a", "https://a")),
      cand("stroma", Magnification::X20, "collagen")
        .with_classes(["tumor"])
        .with_evidence(EvidenceRef::new("b", "https://b")),
    ]);

    let entry = onto.get(&ConceptId::parse("stroma").unwrap()).unwrap();
    assert_eq!(entry.magnifications.len(), 2);
    assert_eq!(entry.applies_to.len(), 2);
    assert_eq!(entry.evidence.len(), 2);
  }

  #[test]
  fn remerging_is_a_no_op() {
    let batch = vec![
      cand("a", Magnification::X10, "first").with_evidence(EvidenceRef::new("t", "u")),
      cand("b", Magnification::X40, "second"),
    ];
    let mut onto = Ontology::new();
    onto.merge(batch.clone());
    let snapshot = onto.clone();

    let report = onto.merge(batch);
    assert_eq!(onto, snapshot);
    assert!(report.delta.is_empty());
  }

  #[test]
  fn batch_order_does_not_matter() {
    let a = cand("atypia", Magnification::X40, "large nuclei").with_classes(["tumor"]);
    let b = cand("Atypia", Magnification::X20, "big nuclei")
      .with_evidence(EvidenceRef::new("x", "y"));
    let c = cand("atypia", Magnification::X10, "huge nuclei").with_classes(["mimic"]);

    let mut left = Ontology::new();
    left.merge([a.clone(), b.clone()]);
    left.merge([c.clone()]);

    let mut right = Ontology::new();
    right.merge([c]);
    right.merge([b, a]);

    assert_eq!(left, right);
  }

  #[test]
  fn equal_length_texts_resolve_lexicographically() {
    let mut left = Ontology::new();
    left.merge([cand("x", Magnification::X10, "bbb"), cand("x", Magnification::X10, "aaa")]);
    let mut right = Ontology::new();
    right.merge([cand("x", Magnification::X10, "aaa"), cand("x", Magnification::X10, "bbb")]);
    assert_eq!(left, right);
  }

  #[test]
  fn slice_returns_only_delta_entries() {
    let mut onto = Ontology::new();
    onto.merge([cand("a", Magnification::X10, "a")]);
    let report = onto.merge([cand("b", Magnification::X10, "b")]);
    let slice = onto.slice(&report.delta);
    assert_eq!(slice.len(), 1);
    assert!(slice.contains_key(&ConceptId::parse("b").unwrap()));
  }
}
