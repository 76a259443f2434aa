//! Support library for the `morphont` binary: layered settings and the
//! snapshot persistence used by `morphont validate` and `morphont generate`.

pub mod settings;
pub mod snapshot;

pub use settings::{Settings, expand_tilde};
pub use snapshot::{
  PersistedPaths, SnapshotReport, class_count, class_descriptions, generate_snapshot,
  persist_snapshot,
};
