//! Settings read from `morphont.toml`, layered under `MORPHONT__*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use morphont_pipeline::PipelineConfig;
use morphont_providers::{ModelConfig, RetrievalConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default = "default_cache_path")]
  pub cache_path: PathBuf,
  /// Per-iteration artifacts land here.
  #[serde(default = "default_output_dir")]
  pub output_dir: PathBuf,
  /// Dataset directories written by `validate`.
  #[serde(default = "default_data_root")]
  pub data_root:  PathBuf,
  #[serde(default)]
  pub retrieval:  RetrievalConfig,
  #[serde(default)]
  pub pipeline:   PipelineConfig,
  #[serde(default)]
  pub model:      ModelConfig,
}

fn default_cache_path() -> PathBuf { PathBuf::from("documents/ontology_cache.db") }
fn default_output_dir() -> PathBuf { PathBuf::from("runs/react_split") }
fn default_data_root() -> PathBuf { PathBuf::from("data") }

impl Settings {
  /// Read `path` if it exists, then apply environment overrides such as
  /// `MORPHONT__PIPELINE__MAX_ITERS=5`. Paths have `~` expanded.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let layered = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("MORPHONT")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut settings: Settings = layered
      .try_deserialize()
      .context("failed to deserialise settings")?;

    settings.cache_path = expand_tilde(&settings.cache_path);
    settings.output_dir = expand_tilde(&settings.output_dir);
    settings.data_root = expand_tilde(&settings.data_root);
    Ok(settings)
  }
}

/// Replace a leading `~/` with `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
  if let Ok(rest) = path.strip_prefix("~")
    && let Some(home) = std::env::var_os("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
