//! The iterative retrieval-merge pipeline.
//!
//! [`IterationController`] drives one run through
//! `plan → search → summarize → extract → merge → persist → observe` until
//! the concept target or the iteration budget is reached. Every search is
//! written through a [`morphont_core::cache::SearchCache`]; every cycle
//! leaves JSON artifacts behind through [`ArtifactWriter`].
//!
//! [`run_extraction`] drafts a single snapshot item from a search that is
//! already cached.

pub mod artifacts;
pub mod config;
pub mod controller;
pub mod error;
pub mod extraction;
pub mod retry;
pub mod state;

pub use artifacts::ArtifactWriter;
pub use config::{PipelineConfig, RetryConfig};
pub use controller::{Collaborators, IterationController};
pub use error::{Error, Result};
pub use extraction::{ExtractionReport, ExtractionRequest, run_extraction};
pub use retry::{Attempt, RateLimiter, RetryError, RetryPolicy};
pub use state::{IterationState, RunOutcome, Stage, StopReason};
