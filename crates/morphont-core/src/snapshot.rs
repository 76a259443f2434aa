//! Persisted concept snapshot schema.
//!
//! A snapshot is a JSON array of [`ConceptItem`]s. Batches are validated as a
//! whole: a single bad item rejects the batch, and the error lists every
//! missing or invalid field across all items.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, VariantNames};

use crate::{Error, Result, cache::ExtractionRecord, concept::Magnification};

/// Fields every snapshot item must carry, in wire order.
pub const REQUIRED_FIELDS: [&str; 7] = [
  "name",
  "definition",
  "synonyms",
  "concept_type",
  "positives",
  "negatives",
  "magnifications",
];

/// Allowed length of `positives` and `negatives`.
pub const CUE_RANGE: std::ops::RangeInclusive<usize> = 3..=6;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConceptType {
  Class,
  Compartment,
  Morphology,
  Interface,
  Substructure,
}

/// One concept in a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConceptItem {
  pub name:           String,
  pub definition:     String,
  #[serde(default)]
  pub synonyms:       Vec<String>,
  pub concept_type:   ConceptType,
  pub positives:      Vec<String>,
  pub negatives:      Vec<String>,
  pub magnifications: Vec<Magnification>,
}

/// A validated item with its namespaced, stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedConcept {
  pub id:   String,
  #[serde(flatten)]
  pub item: ConceptItem,
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Check a single raw item; returns the problems found (empty when valid).
pub fn validate_item(item: &Value) -> Vec<String> {
  let Some(obj) = item.as_object() else {
    return vec!["expected a JSON object".to_owned()];
  };

  let mut errors = Vec::new();

  for field in REQUIRED_FIELDS {
    if !obj.contains_key(field) {
      errors.push(format!("missing field: {field}"));
    }
  }
  for key in obj.keys() {
    if !REQUIRED_FIELDS.contains(&key.as_str()) {
      errors.push(format!("unknown field: {key}"));
    }
  }

  for field in ["name", "definition"] {
    if let Some(v) = obj.get(field)
      && !v.is_string()
    {
      errors.push(format!("{field} must be a string"));
    }
  }

  if let Some(v) = obj.get("concept_type") {
    let ok = v.as_str().is_some_and(|s| s.parse::<ConceptType>().is_ok());
    if !ok {
      errors.push(format!(
        "concept_type must be one of {:?}",
        ConceptType::VARIANTS
      ));
    }
  }

  if let Some(v) = obj.get("magnifications") {
    let ok = v.as_array().is_some_and(|mags| {
      mags
        .iter()
        .all(|m| m.as_str().is_some_and(|s| s.parse::<Magnification>().is_ok()))
    });
    if !ok {
      errors.push("magnifications must be a subset of [\"10x\", \"20x\", \"40x\"]".to_owned());
    }
  }

  for field in ["synonyms", "positives", "negatives"] {
    let Some(v) = obj.get(field) else { continue };
    let Some(values) = v.as_array() else {
      errors.push(format!("{field} must be a list of strings"));
      continue;
    };
    if !values.iter().all(Value::is_string) {
      errors.push(format!("{field} must be a list of strings"));
      continue;
    }
    if field != "synonyms" && !CUE_RANGE.contains(&values.len()) {
      errors.push(format!(
        "{field} must have {} to {} items",
        CUE_RANGE.start(),
        CUE_RANGE.end()
      ));
    }
  }

  errors
}

/// Validate a raw batch. Either every item is valid and the typed items are
/// returned, or [`Error::Validation`] lists the problems of every item.
pub fn validate_batch(raw: &Value) -> Result<Vec<ConceptItem>> {
  let Some(items) = raw.as_array() else {
    return Err(Error::Validation {
      errors: vec!["expected a JSON array".to_owned()],
    });
  };

  let errors: Vec<String> = items
    .iter()
    .enumerate()
    .flat_map(|(idx, item)| {
      validate_item(item)
        .into_iter()
        .map(move |e| format!("item[{idx}]: {e}"))
    })
    .collect();

  if !errors.is_empty() {
    return Err(Error::Validation { errors });
  }

  items
    .iter()
    .map(|item| Ok(serde_json::from_value(item.clone())?))
    .collect()
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Lowercase alphanumerics joined by single dashes; `"concept"` when nothing
/// survives.
pub fn slugify(value: &str) -> String {
  let slug = value
    .split(|c: char| !c.is_alphanumeric())
    .filter(|part| !part.is_empty())
    .map(str::to_lowercase)
    .collect::<Vec<_>>()
    .join("-");
  if slug.is_empty() { "concept".to_owned() } else { slug }
}

/// Assign `namespace/slug` ids and deduplicate synonyms (trimmed,
/// lowercased) across the whole batch; a synonym is kept only on the first
/// item that lists it.
pub fn normalize(items: Vec<ConceptItem>, namespace: &str) -> Vec<NormalizedConcept> {
  let mut seen = HashSet::new();
  items
    .into_iter()
    .map(|mut item| {
      item.synonyms = item
        .synonyms
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect();
      NormalizedConcept { id: format!("{namespace}/{}", slugify(&item.name)), item }
    })
    .collect()
}

/// An item with every required field present and empty: lists for the
/// plural fields, strings otherwise. Stands in for a draft that could not be
/// parsed.
pub fn placeholder_item() -> Value {
  REQUIRED_FIELDS
    .iter()
    .map(|field| {
      let empty = if field.ends_with('s') { Value::Array(Vec::new()) } else { Value::from("") };
      ((*field).to_owned(), empty)
    })
    .collect::<serde_json::Map<_, _>>()
    .into()
}

// ─── Trees ───────────────────────────────────────────────────────────────────

/// The two top-level classes every ontology starts from.
pub fn base_ontology() -> Vec<ConceptItem> {
  fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
  }

  vec![
    ConceptItem {
      name:           "Tumor".into(),
      definition:     "Malignant epithelial proliferation/metastasis.".into(),
      synonyms:       strings(&["carcinoma", "metastasis"]),
      concept_type:   ConceptType::Class,
      positives:      strings(&[
        "cohesive epithelial islands",
        "nuclear atypia",
        "mitoses",
        "peripheral palisading",
      ]),
      negatives:      strings(&["adipocytes", "dense collagen stroma", "lymphoid follicles"]),
      magnifications: vec![Magnification::X20, Magnification::X40],
    },
    ConceptItem {
      name:           "Normal".into(),
      definition:     "Non-neoplastic tissue compartments.".into(),
      synonyms:       strings(&["benign"]),
      concept_type:   ConceptType::Class,
      positives:      strings(&[
        "ordered lymphoid follicles",
        "mature adipocytes",
        "regular stromal collagen",
      ]),
      negatives:      strings(&["malignant epithelial clusters", "necrosis", "mitoses"]),
      magnifications: vec![Magnification::X10, Magnification::X20],
    },
  ]
}

/// Combine the base classes (optionally) with every object found under the
/// `extraction` key of cached extraction records. Objects are taken as-is;
/// arrays contribute their object elements.
pub fn build_tree(include_base: bool, extractions: &[ExtractionRecord]) -> Result<Vec<Value>> {
  let mut tree = Vec::new();
  if include_base {
    for item in base_ontology() {
      tree.push(serde_json::to_value(item)?);
    }
  }

  for record in extractions {
    match record.content.get("extraction") {
      Some(obj @ Value::Object(_)) => tree.push(obj.clone()),
      Some(Value::Array(items)) => {
        tree.extend(items.iter().filter(|v| v.is_object()).cloned());
      }
      _ => {}
    }
  }

  Ok(tree)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use serde_json::json;

  use super::*;

  fn valid_item(name: &str) -> Value {
    json!({
      "name": name,
      "definition": "Cohesive clusters of malignant cells.",
      "synonyms": ["Nest", "cluster"],
      "concept_type": "morphology",
      "positives": ["a", "b", "c"],
      "negatives": ["d", "e", "f"],
      "magnifications": ["20x", "40x"]
    })
  }

  #[test]
  fn base_ontology_passes_its_own_validation() {
    let raw = serde_json::to_value(base_ontology()).unwrap();
    assert_eq!(validate_batch(&raw).unwrap().len(), 2);
  }

  #[test]
  fn valid_batch_is_accepted() {
    let items = validate_batch(&json!([valid_item("Tumor nest")])).unwrap();
    assert_eq!(items[0].concept_type, ConceptType::Morphology);
  }

  #[test]
  fn one_bad_item_rejects_the_batch_with_every_field_listed() {
    let mut bad = valid_item("bad");
    bad["concept_type"] = json!("organ");
    bad["positives"] = json!(["only one"]);
    bad["magnifications"] = json!(["5x"]);
    bad.as_object_mut().unwrap().remove("definition");

    let err = validate_batch(&json!([valid_item("ok"), bad])).unwrap_err();
    let Error::Validation { errors } = err else { panic!("expected validation error") };
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.starts_with("item[1]")));
    assert!(errors.iter().any(|e| e.contains("missing field: definition")));
    assert!(errors.iter().any(|e| e.contains("concept_type")));
    assert!(errors.iter().any(|e| e.contains("positives")));
    assert!(errors.iter().any(|e| e.contains("magnifications")));
  }

  #[test]
  fn non_array_batch_is_rejected() {
    assert!(matches!(
      validate_batch(&valid_item("x")),
      Err(Error::Validation { .. })
    ));
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let mut item = valid_item("x");
    item["extra"] = json!(1);
    let errors = validate_item(&item);
    assert_eq!(errors, vec!["unknown field: extra".to_owned()]);
  }

  #[test]
  fn normalize_assigns_ids_and_dedups_synonyms_across_items() {
    let items = validate_batch(&json!([valid_item("Tumor Nest"), valid_item("Tumor–Stroma interface")]))
      .unwrap();
    let normalized = normalize(items, "camelyon16");
    assert_eq!(normalized[0].id, "camelyon16/tumor-nest");
    assert_eq!(normalized[1].id, "camelyon16/tumor-stroma-interface");
    assert_eq!(normalized[0].item.synonyms, vec!["nest", "cluster"]);
    assert!(normalized[1].item.synonyms.is_empty());
  }

  #[test]
  fn slugify_falls_back_for_empty_names() {
    assert_eq!(slugify("--"), "concept");
    assert_eq!(slugify("Camelyon16"), "camelyon16");
  }

  #[test]
  fn placeholder_has_every_field_and_nothing_else() {
    let item = placeholder_item();
    let errors = validate_item(&item);
    assert!(errors.iter().all(|e| !e.starts_with("missing") && !e.starts_with("unknown")));
    assert_eq!(item["positives"], json!([]));
    assert_eq!(item["name"], json!(""));
  }

  #[test]
  fn tree_collects_objects_from_extractions() {
    let record = |content: Value| ExtractionRecord {
      id: 1,
      search_id: 1,
      extractor: "manual".into(),
      keyword: "k".into(),
      content,
      created_at: Utc::now(),
    };
    let records = vec![
      record(json!({ "extraction": { "name": "a" } })),
      record(json!({ "extraction": [{ "name": "b" }, 3] })),
      record(json!({ "summary": "no extraction" })),
    ];

    assert_eq!(build_tree(false, &records).unwrap().len(), 2);
    assert_eq!(build_tree(true, &records).unwrap().len(), 4);
  }
}
