//! [`IterationController`]: the `plan → … → observe` state machine.
//!
//! One run owns its [`IterationState`]. Each stage reads and writes that
//! state, and the controller alone decides the next stage. Collaborator
//! output that fails its schema check is replaced by an empty contribution
//! and logged as a [`Diagnostic`]; retrieval failures, cache failures and
//! artifact write failures abort the run with the stage that failed.

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use morphont_core::{
  CollabError,
  cache::{NewExtraction, NewSearch, ResultItem, SearchCache, write_results},
  collab::{ConceptExtractor, Evidence, QueryPlanner, RetrievalClient, Summarizer},
  concept::Magnification,
  ontology::Ontology,
};
use serde_json::json;
use strum::IntoEnumIterator as _;
use tracing::{debug, info, warn};

use crate::{
  ArtifactWriter, Error, PipelineConfig, Result,
  state::{
    Diagnostic, IterationState, RunOutcome, Stage, StopReason, SummarizedHit,
    TaggedHit,
  },
};

/// Tool label recorded with every search the controller caches.
pub const TOOL_LABEL: &str = "iteration_controller";

/// Upper bound on queries searched per cycle.
pub const MAX_QUERIES: usize = 4;

/// Tried queries shown to the planner.
const PLAN_HISTORY: usize = 10;
/// Tried queries shown to the mutator.
const MUTATE_HISTORY: usize = 12;
/// Snippet characters handed to the summarizer.
const SNIPPET_CHARS: usize = 1600;

/// Queries used when a cycle would otherwise search nothing; in practice
/// only the first cycle, since later ones inherit the mutated batch.
pub fn fallback_queries(target: &str) -> Vec<String> {
  vec![
    format!("{target} histology morphology features low power"),
    format!("{target} cytology nucleoli mitoses high power"),
    format!("{target} benign mimics differential diagnosis histology"),
  ]
}

/// Queries used when mutation yields nothing new.
pub fn mutation_fallback(target: &str) -> Vec<String> {
  vec![
    format!("{target} subcapsular nests capsule sinus histology"),
    format!("{target} nuclear atypia mitoses high power histology"),
  ]
}

/// Steering text for the mutator, built from the ontology's current coverage.
pub fn coverage_hints(ontology: &Ontology, min_concepts: usize) -> String {
  let mut hints = format!(
    "Too few concepts merged ({} of {min_concepts}); emphasize magnification \
     words and benign mimics.",
    ontology.len()
  );

  let missing: Vec<String> = Magnification::iter()
    .filter(|mag| {
      !ontology
        .concepts
        .values()
        .any(|entry| entry.magnifications.contains(mag))
    })
    .map(|mag| mag.to_string())
    .collect();
  if !missing.is_empty() {
    hints.push_str(&format!(" No concepts yet at {}.", missing.join(", ")));
  }
  hints
}

fn truncate_chars(s: &str, max: usize) -> String { s.chars().take(max).collect() }

// ─── Collaborators ───────────────────────────────────────────────────────────

/// The external capabilities a run talks to.
pub struct Collaborators<R, P, S, X> {
  pub retrieval:  R,
  pub planner:    P,
  pub summarizer: S,
  pub extractor:  X,
}

enum Transition {
  Next(Stage),
  Finished(PathBuf),
}

// ─── Controller ──────────────────────────────────────────────────────────────

pub struct IterationController<C, R, P, S, X> {
  cache:  C,
  collab: Collaborators<R, P, S, X>,
  config: PipelineConfig,
  cancel: Option<Arc<AtomicBool>>,
}

impl<C, R, P, S, X> IterationController<C, R, P, S, X>
where
  C: SearchCache,
  R: RetrievalClient,
  P: QueryPlanner,
  S: Summarizer,
  X: ConceptExtractor,
{
  pub fn new(cache: C, collab: Collaborators<R, P, S, X>, config: PipelineConfig) -> Self {
    Self { cache, collab, config, cancel: None }
  }

  /// Abort the run at the next stage boundary once `flag` is set.
  pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
    self.cancel = Some(flag);
    self
  }

  pub fn cache(&self) -> &C { &self.cache }

  pub fn collaborators(&self) -> &Collaborators<R, P, S, X> { &self.collab }

  pub fn config(&self) -> &PipelineConfig { &self.config }

  fn cancelled(&self) -> bool {
    self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
  }

  /// Drive `state` from `Plan` to `Done`.
  ///
  /// On failure the returned [`Error::Stage`] names the cycle, the failing
  /// stage and the last stage that completed. Artifacts already written stay
  /// on disk.
  pub async fn run(&self, state: &mut IterationState) -> Result<RunOutcome> {
    let artifacts = ArtifactWriter::new(&state.output_dir);
    info!(
      run_id = %state.run_id,
      target_class = %state.target_class,
      min_concepts = self.config.min_concepts,
      max_iters = self.config.max_iters,
      output_dir = %state.output_dir.display(),
      "starting run"
    );

    let mut stage = Stage::Plan;
    let mut last_completed = None;

    let final_snapshot = loop {
      if self.cancelled() {
        warn!(iteration = state.iteration, %stage, "run cancelled");
        return Err(Error::Cancelled { iteration: state.iteration, stage });
      }

      debug!(iteration = state.iteration, %stage, "entering stage");
      let transition = self.step(stage, state, &artifacts).await.map_err(|source| {
        Error::Stage {
          iteration: state.iteration,
          stage,
          last_completed,
          source: Box::new(source),
        }
      })?;
      last_completed = Some(stage);

      match transition {
        Transition::Next(next) => stage = next,
        Transition::Finished(path) => break path,
      }
    };

    let stop_reason = state.stop_reason.unwrap_or(StopReason::BudgetExhausted);
    info!(
      iterations = state.iteration,
      concepts = state.ontology.len(),
      %stop_reason,
      snapshot = %final_snapshot.display(),
      "run finished"
    );

    Ok(RunOutcome {
      run_id: state.run_id,
      iterations: state.iteration,
      stop_reason,
      ontology: state.ontology.clone(),
      tried_queries: state.tried_queries.clone(),
      final_snapshot,
    })
  }

  async fn step(
    &self,
    stage: Stage,
    state: &mut IterationState,
    artifacts: &ArtifactWriter,
  ) -> Result<Transition> {
    let next = match stage {
      Stage::Plan => {
        self.plan(state).await?;
        Stage::Search
      }
      Stage::Search => {
        self.search(state).await?;
        Stage::Summarize
      }
      Stage::Summarize => {
        self.summarize(state).await?;
        Stage::Extract
      }
      Stage::Extract => {
        self.extract(state).await?;
        Stage::Merge
      }
      Stage::Merge => {
        merge(state);
        Stage::Persist
      }
      Stage::Persist => {
        artifacts.write_iteration(state).await?;
        state.diagnostics.clear();
        Stage::Observe
      }
      Stage::Observe => {
        if self.observe(state) { Stage::Done } else { Stage::Mutate }
      }
      Stage::Mutate => {
        self.mutate(state).await?;
        Stage::Plan
      }
      Stage::Done => return Ok(Transition::Finished(artifacts.write_final(state).await?)),
    };
    Ok(Transition::Next(next))
  }

  // ── Stages ────────────────────────────────────────────────────────────────

  /// Start a cycle: bump the counter and settle this cycle's query batch.
  ///
  /// Later cycles begin from the batch `Mutate` left behind and top it up
  /// with planner output. An empty batch falls back to fixed templates.
  async fn plan(&self, state: &mut IterationState) -> Result<()> {
    state.iteration += 1;
    state.reset_cycle();

    let tried = state.recent_queries(PLAN_HISTORY);
    let planned = degrade(
      self.collab.planner.plan(&state.target_class, &tried).await,
      &mut state.diagnostics,
      Stage::Plan,
      "",
      "",
    )?;

    let mut queries = std::mem::take(&mut state.current_queries);
    for query in planned {
      if !queries.contains(&query) {
        queries.push(query);
      }
    }
    queries.truncate(MAX_QUERIES);

    if queries.is_empty() {
      info!(iteration = state.iteration, "planner returned nothing, using fallback queries");
      queries = fallback_queries(&state.target_class);
    }

    info!(iteration = state.iteration, queries = ?queries, "planned");
    state.current_queries = queries;
    Ok(())
  }

  /// Run every query, caching each call and its hits before moving on.
  async fn search(&self, state: &mut IterationState) -> Result<()> {
    let cap = state.result_cap;
    let source = self.collab.retrieval.source().to_owned();

    for query in state.current_queries.clone() {
      state.tried_queries.push(query.clone());

      let hits = self.collab.retrieval.search(&query, cap).await?;
      let written = write_results(
        &self.cache,
        NewSearch {
          keyword:     query.clone(),
          source:      source.clone(),
          tool:        TOOL_LABEL.to_owned(),
          max_results: u32::try_from(cap).unwrap_or(u32::MAX),
          args:        json!({
            "run_id": state.run_id,
            "query": query,
            "cap": cap,
            "iteration": state.iteration,
            "target_class": state.target_class,
          }),
        },
        hits.iter().map(ResultItem::from).collect(),
      )
      .await
      .map_err(Error::cache)?;

      info!(
        query = %query,
        hits = hits.len(),
        added = written.added,
        search_id = written.search_id,
        "searched"
      );

      state.hits.extend(hits.into_iter().map(|hit| TaggedHit {
        origin_query: query.clone(),
        search_id: written.search_id,
        hit,
      }));
    }
    Ok(())
  }

  async fn summarize(&self, state: &mut IterationState) -> Result<()> {
    let mut summaries = Vec::with_capacity(state.hits.len());

    for tagged in &state.hits {
      let mut hit = tagged.hit.clone();
      hit.snippet = truncate_chars(&hit.snippet, SNIPPET_CHARS);

      let summary = degrade(
        self.collab.summarizer.summarize(&hit).await,
        &mut state.diagnostics,
        Stage::Summarize,
        &hit.title,
        &hit.url,
      )?;

      summaries.push(SummarizedHit {
        origin_query: tagged.origin_query.clone(),
        search_id: tagged.search_id,
        title: hit.title,
        url: hit.url,
        snippet: hit.snippet,
        summary,
      });
    }

    state.summaries = summaries;
    Ok(())
  }

  /// Extract candidates from every summarized hit. Each candidate is tagged
  /// with the hit as evidence and defaults to the target class. Every
  /// attempt, malformed or not, is recorded in the cache.
  async fn extract(&self, state: &mut IterationState) -> Result<()> {
    let label = self.collab.extractor.label().to_owned();

    for unit in &state.summaries {
      let evidence = Evidence {
        title:   unit.title.clone(),
        url:     unit.url.clone(),
        snippet: unit.snippet.clone(),
        summary: unit.summary.clone(),
      };
      let reference = evidence.reference();

      let (candidates, error) =
        match self.collab.extractor.extract(&state.target_class, &evidence).await {
          Ok(candidates) => (candidates, None),
          Err(err) if err.is_malformed() => {
            note_malformed(&mut state.diagnostics, Stage::Extract, &unit.title, &unit.url, &err);
            (Vec::new(), Some(err.to_string()))
          }
          Err(err) => return Err(err.into()),
        };

      let candidates: Vec<_> = candidates
        .into_iter()
        .map(|mut candidate| {
          if candidate.applies_to.is_empty() {
            candidate.applies_to.insert(state.target_class.clone());
          }
          if !reference.is_empty() {
            candidate.evidence = reference.clone();
          }
          candidate
        })
        .collect();

      self
        .cache
        .record_extraction(NewExtraction {
          search_id: unit.search_id,
          extractor: label.clone(),
          keyword:   unit.origin_query.clone(),
          content:   json!({
            "iteration": state.iteration,
            "target_class": state.target_class,
            "title": unit.title,
            "url": unit.url,
            "summary": unit.summary,
            "candidates": candidates,
            "error": error,
          }),
        })
        .await
        .map_err(Error::cache)?;

      debug!(title = %unit.title, candidates = candidates.len(), "extracted");
      state.candidates.extend(candidates);
    }
    Ok(())
  }

  fn observe(&self, state: &mut IterationState) -> bool {
    let reason = if state.ontology.len() >= self.config.min_concepts {
      Some(StopReason::Converged)
    } else if state.iteration >= self.config.max_iters {
      Some(StopReason::BudgetExhausted)
    } else {
      None
    };

    state.stop = reason.is_some();
    state.stop_reason = reason;
    info!(
      iteration = state.iteration,
      concepts = state.ontology.len(),
      stop = state.stop,
      "observed"
    );
    state.stop
  }

  /// Propose queries unlike any tried so far for the next cycle.
  async fn mutate(&self, state: &mut IterationState) -> Result<()> {
    let tried = state.recent_queries(MUTATE_HISTORY);
    let hints = coverage_hints(&state.ontology, self.config.min_concepts);

    let proposed = degrade(
      self.collab.planner.mutate(&state.target_class, &tried, &hints).await,
      &mut state.diagnostics,
      Stage::Mutate,
      "",
      "",
    )?;

    let mut queries = Vec::new();
    for query in proposed {
      if !state.tried_queries.contains(&query) && !queries.contains(&query) {
        queries.push(query);
      }
    }
    queries.truncate(MAX_QUERIES);

    if queries.is_empty() {
      info!(iteration = state.iteration, "mutation produced nothing new, using fallback");
      queries = mutation_fallback(&state.target_class);
    }

    info!(iteration = state.iteration, queries = ?queries, "mutated");
    state.current_queries = queries;
    Ok(())
  }
}

fn merge(state: &mut IterationState) {
  let report = state.ontology.merge(state.candidates.iter().cloned());
  state.delta = report.delta;
  state.rejected = report.rejected;
  info!(
    iteration = state.iteration,
    delta = state.delta.len(),
    rejected = state.rejected,
    total = state.ontology.len(),
    "merged"
  );
}

fn note_malformed(
  diagnostics: &mut Vec<Diagnostic>,
  stage: Stage,
  title: &str,
  url: &str,
  err: &CollabError,
) {
  warn!(%stage, title, error = %err, "malformed collaborator output");
  diagnostics.push(Diagnostic {
    stage,
    title: title.to_owned(),
    url: url.to_owned(),
    message: err.to_string(),
  });
}

/// Replace malformed output with an empty value; pass other errors through.
fn degrade<T: Default>(
  result: std::result::Result<T, CollabError>,
  diagnostics: &mut Vec<Diagnostic>,
  stage: Stage,
  title: &str,
  url: &str,
) -> Result<T> {
  match result {
    Ok(value) => Ok(value),
    Err(err) if err.is_malformed() => {
      note_malformed(diagnostics, stage, title, url, &err);
      Ok(T::default())
    }
    Err(err) => Err(err.into()),
  }
}
