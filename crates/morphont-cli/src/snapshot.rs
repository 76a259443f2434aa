//! Validated concept batches persisted as a dataset directory:
//!
//! ```text
//! <data_root>/<dataset>/concepts.json
//! <data_root>/<dataset>/ontology.json
//! <data_root>/<dataset>/runs/<timestamp>/raw_model.json
//! <data_root>/<dataset>/runs/<timestamp>/validated.json
//! ```
//!
//! Batches come either from a file (`validate`) or from a
//! [`SnapshotDrafter`] asked for a whole dataset (`generate`).

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use morphont_core::{
  Error as CoreError,
  collab::SnapshotDrafter,
  snapshot::{NormalizedConcept, normalize, slugify, validate_batch},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct PersistedPaths {
  pub concepts_path: PathBuf,
  pub ontology_path: PathBuf,
  pub run_dir:       PathBuf,
}

/// What `validate` prints.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SnapshotReport {
  Ok { count: usize, paths: PersistedPaths },
  Invalid { errors: Vec<String> },
}

fn write_pretty(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
  let body = serde_json::to_string_pretty(value)?;
  std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

/// Validate `raw_json` as a concept batch and, when every item passes,
/// normalise it under the dataset's namespace and write it out. An invalid
/// batch writes nothing.
pub fn persist_snapshot(
  data_root: &Path,
  dataset: &str,
  raw_json: &str,
) -> anyhow::Result<SnapshotReport> {
  let raw: Value = match serde_json::from_str(raw_json) {
    Ok(raw) => raw,
    Err(e) => {
      return Ok(SnapshotReport::Invalid { errors: vec![format!("invalid JSON array: {e}")] });
    }
  };
  let items = match validate_batch(&raw) {
    Ok(items) => items,
    Err(CoreError::Validation { errors }) => return Ok(SnapshotReport::Invalid { errors }),
    Err(e) => return Err(e.into()),
  };

  let namespace = slugify(dataset);
  let normalized = normalize(items, &namespace);

  let dataset_dir = data_root.join(dataset);
  let run_dir = dataset_dir
    .join("runs")
    .join(Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string());
  std::fs::create_dir_all(&run_dir)
    .with_context(|| format!("failed to create {}", run_dir.display()))?;

  std::fs::write(run_dir.join("raw_model.json"), raw_json)
    .with_context(|| format!("failed to write raw batch under {}", run_dir.display()))?;
  write_pretty(&run_dir.join("validated.json"), &normalized)?;

  let concepts_path = dataset_dir.join("concepts.json");
  write_pretty(&concepts_path, &normalized)?;

  let ontology_path = dataset_dir.join("ontology.json");
  write_pretty(&ontology_path, &ontology_index(&normalized))?;

  info!(dataset, count = normalized.len(), "persisted concept snapshot");
  Ok(SnapshotReport::Ok {
    count: normalized.len(),
    paths: PersistedPaths { concepts_path, ontology_path, run_dir },
  })
}

/// Class descriptions as given by the user: the parsed JSON document, or the
/// raw text under `_raw` when it is not JSON.
pub fn class_descriptions(text: &str) -> Value {
  serde_json::from_str(text).unwrap_or_else(|_| json!({ "_raw": text }))
}

/// Explicit hint first, else the number of described classes when they
/// form an object.
pub fn class_count(descriptions: &Value, hint: Option<usize>) -> Option<usize> {
  hint.or_else(|| descriptions.as_object().map(serde_json::Map::len))
}

/// Ask `drafter` for a batch covering every class, then validate and persist
/// it through [`persist_snapshot`]. A reply that is not a JSON array is
/// reported as invalid rather than failing the command.
pub async fn generate_snapshot<D>(
  drafter: &D,
  data_root: &Path,
  dataset: &str,
  classes: &Value,
  num_classes: Option<usize>,
) -> anyhow::Result<SnapshotReport>
where
  D: SnapshotDrafter,
{
  let num_classes = class_count(classes, num_classes);
  info!(dataset, ?num_classes, drafter = drafter.label(), "drafting concept batch");

  let batch = match drafter.draft_batch(dataset, classes, num_classes).await {
    Ok(batch) => batch,
    Err(e) if e.is_malformed() => {
      warn!(dataset, error = %e, "model reply rejected");
      return Ok(SnapshotReport::Invalid { errors: vec![e.to_string()] });
    }
    Err(e) => return Err(e).context("concept generation failed"),
  };

  persist_snapshot(data_root, dataset, &serde_json::to_string_pretty(&batch)?)
}

fn ontology_index(concepts: &[NormalizedConcept]) -> Value {
  let concepts: Vec<Value> = concepts
    .iter()
    .map(|c| json!({ "id": c.id, "name": c.item.name, "concept_type": c.item.concept_type }))
    .collect();
  json!({ "concepts": concepts, "relations": [] })
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use morphont_core::CollabError;

  use super::*;

  /// Replies with a fixed batch and remembers what it was asked.
  struct FixedDrafter {
    reply: Result<Value, CollabError>,
    asked: Mutex<Vec<(String, Option<usize>)>>,
  }

  impl FixedDrafter {
    fn new(reply: Result<Value, CollabError>) -> Self { Self { reply, asked: Mutex::new(Vec::new()) } }
  }

  impl SnapshotDrafter for FixedDrafter {
    fn label(&self) -> &str { "fixed" }

    async fn draft_item(&self, _: &str, _: &str, _: &str) -> Result<Value, CollabError> {
      self.reply.clone()
    }

    async fn draft_batch(
      &self,
      dataset: &str,
      _classes: &Value,
      num_classes: Option<usize>,
    ) -> Result<Value, CollabError> {
      self.asked.lock().unwrap().push((dataset.to_owned(), num_classes));
      self.reply.clone()
    }
  }

  fn item(name: &str, synonyms: &[&str]) -> Value {
    json!({
      "name": name,
      "definition": "d",
      "synonyms": synonyms,
      "concept_type": "morphology",
      "positives": ["a", "b", "c"],
      "negatives": ["x", "y", "z"],
      "magnifications": ["20x"],
    })
  }

  #[test]
  fn valid_batch_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let raw = json!([item("Nuclear Atypia", &["Pleomorphism"]), item("Mitoses", &["pleomorphism "])]);

    let report = persist_snapshot(dir.path(), "Camelyon16", &raw.to_string()).unwrap();
    let SnapshotReport::Ok { count, paths } = report else { panic!("batch rejected") };
    assert_eq!(count, 2);
    assert!(paths.run_dir.join("raw_model.json").exists());
    assert!(paths.run_dir.join("validated.json").exists());

    let concepts: Value =
      serde_json::from_str(&std::fs::read_to_string(&paths.concepts_path).unwrap()).unwrap();
    assert_eq!(concepts[0]["id"], "camelyon16/nuclear-atypia");
    assert_eq!(concepts[0]["synonyms"], json!(["pleomorphism"]));
    assert_eq!(concepts[1]["synonyms"], json!([]));

    let ontology: Value =
      serde_json::from_str(&std::fs::read_to_string(&paths.ontology_path).unwrap()).unwrap();
    assert_eq!(ontology["concepts"][1]["id"], "camelyon16/mitoses");
    assert_eq!(ontology["concepts"][1]["concept_type"], "morphology");
    assert_eq!(ontology["relations"], json!([]));
  }

  #[test]
  fn invalid_batch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut bad = item("Necrosis", &[]);
    bad["concept_type"] = json!("organ");
    let raw = json!([item("Mitoses", &[]), bad]);

    let report = persist_snapshot(dir.path(), "Camelyon16", &raw.to_string()).unwrap();
    let SnapshotReport::Invalid { errors } = report else { panic!("batch accepted") };
    assert!(errors.iter().all(|e| e.starts_with("item[1]")));
    assert!(!dir.path().join("Camelyon16").exists());
  }

  #[test]
  fn unparsable_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let report = persist_snapshot(dir.path(), "d", "not json").unwrap();
    assert!(matches!(report, SnapshotReport::Invalid { .. }));
  }

  #[test]
  fn class_descriptions_fall_back_to_raw_text() {
    let parsed = class_descriptions(r#"{"Tumor": "t", "Normal": "n"}"#);
    assert_eq!(class_count(&parsed, None), Some(2));
    assert_eq!(class_count(&parsed, Some(5)), Some(5));

    let raw = class_descriptions("Tumor vs normal lymph node");
    assert_eq!(raw["_raw"], "Tumor vs normal lymph node");
    assert_eq!(class_count(&json!(["a"]), None), None);
  }

  #[tokio::test]
  async fn generated_batch_is_validated_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let drafter = FixedDrafter::new(Ok(json!([item("Tumor nest", &["Nest"]), item("Necrosis", &[])])));
    let classes = class_descriptions(r#"{"Tumor": "t", "Normal": "n"}"#);

    let report = generate_snapshot(&drafter, dir.path(), "Camelyon16", &classes, None)
      .await
      .unwrap();

    let SnapshotReport::Ok { count, paths } = report else { panic!("batch rejected") };
    assert_eq!(count, 2);
    assert!(paths.concepts_path.exists());
    assert_eq!(*drafter.asked.lock().unwrap(), vec![("Camelyon16".to_owned(), Some(2))]);
  }

  #[tokio::test]
  async fn unusable_generation_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let classes = json!({ "Tumor": "t" });

    let drafter = FixedDrafter::new(Err(CollabError::Malformed("reply is not JSON".into())));
    let report = generate_snapshot(&drafter, dir.path(), "d", &classes, None).await.unwrap();
    assert!(matches!(report, SnapshotReport::Invalid { .. }));

    let drafter = FixedDrafter::new(Ok(json!([item("Tumor nest", &[]), { "name": "half" }])));
    let report = generate_snapshot(&drafter, dir.path(), "d", &classes, None).await.unwrap();
    let SnapshotReport::Invalid { errors } = report else { panic!("batch accepted") };
    assert!(errors.iter().all(|e| e.starts_with("item[1]")));

    let drafter = FixedDrafter::new(Err(CollabError::Model("401".into())));
    assert!(generate_snapshot(&drafter, dir.path(), "d", &classes, None).await.is_err());

    assert!(!dir.path().join("d").exists());
  }
}
