//! Bounded-concurrency batch runner.
//!
//! `concurrency` workers share one cursor over the item list. Each worker
//! claims the next unclaimed index, executes it and reports progress, until
//! the list is exhausted, the run is cancelled, or an item fails fatally.
//! All workers are futures joined inside the caller's task, so they only
//! interleave at await points.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ScriptError;
use crate::events::{RunEvent, RunNotifier};
use crate::script::PlanItem;

/// Counters over a run. `done == ok + fail` and `done <= total` always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
  pub total: usize,
  pub done: usize,
  pub ok: usize,
  pub fail: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
  /// Every item was attempted.
  Completed,
  /// The cancellation token fired before every item was attempted.
  Cancelled,
  /// An item failed fatally; in-flight items drained, the rest were skipped.
  Aborted { item: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
  pub progress: RunProgress,
  pub outcome: RunOutcome,
}

impl RunSummary {
  pub fn is_completed(&self) -> bool {
    self.outcome == RunOutcome::Completed
  }
}

/// Something the runner can name in logs and events.
pub trait RunItem {
  fn label(&self) -> String;
}

impl RunItem for PlanItem {
  fn label(&self) -> String {
    PlanItem::label(self)
  }
}

struct Tracker {
  progress: Mutex<RunProgress>,
}

impl Tracker {
  fn new(total: usize) -> Self {
    Self {
      progress: Mutex::new(RunProgress {
        total,
        ..RunProgress::default()
      }),
    }
  }

  fn record(&self, ok: bool) -> RunProgress {
    let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
    progress.done += 1;
    if ok {
      progress.ok += 1;
    } else {
      progress.fail += 1;
    }
    *progress
  }

  fn snapshot(&self) -> RunProgress {
    *self.progress.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Executes items with bounded concurrency.
///
/// # Usage
///
/// ```ignore
/// let runner = BatchRunner::new(4, &notifier);
/// let summary = runner
///   .run_chunked(&plan.items, 50, &cancel, |_, item| script.execute(item, &values, &ctx))
///   .await;
/// ```
pub struct BatchRunner<'n> {
  run_id: String,
  concurrency: usize,
  notifier: &'n dyn RunNotifier,
}

impl<'n> BatchRunner<'n> {
  pub fn new(concurrency: usize, notifier: &'n dyn RunNotifier) -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      concurrency: concurrency.max(1),
      notifier,
    }
  }

  pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
    self.run_id = run_id.into();
    self
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Execute every item as a single chunk.
  pub async fn run<'a, T, F, Fut>(
    &self,
    items: &'a [T],
    cancel: &CancellationToken,
    execute_one: F,
  ) -> RunSummary
  where
    T: RunItem,
    F: Fn(usize, &'a T) -> Fut,
    Fut: Future<Output = Result<(), ScriptError>>,
  {
    self
      .run_chunked(items, items.len().max(1), cancel, execute_one)
      .await
  }

  /// Execute items chunk by chunk. Chunk `i + 1` starts only after every
  /// item of chunk `i` has finished. Progress is aggregated over all chunks.
  pub async fn run_chunked<'a, T, F, Fut>(
    &self,
    items: &'a [T],
    chunk_size: usize,
    cancel: &CancellationToken,
    execute_one: F,
  ) -> RunSummary
  where
    T: RunItem,
    F: Fn(usize, &'a T) -> Fut,
    Fut: Future<Output = Result<(), ScriptError>>,
  {
    let tracker = Tracker::new(items.len());
    let chunk_size = chunk_size.max(1);
    let chunks = items.len().div_ceil(chunk_size);
    let mut aborted = None;

    for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
      if cancel.is_cancelled() {
        warn!(run_id = %self.run_id, chunk = chunk_index + 1, "run cancelled before chunk");
        break;
      }

      info!(
        run_id = %self.run_id,
        chunk = chunk_index + 1,
        chunks,
        size = chunk.len(),
        "chunk_started"
      );
      self.notifier.notify(RunEvent::ChunkStarted {
        run_id: self.run_id.clone(),
        chunk: chunk_index + 1,
        chunks,
        size: chunk.len(),
      });

      let base = chunk_index * chunk_size;
      if let Some(abort) = self
        .run_chunk(chunk, base, &tracker, cancel, &execute_one)
        .await
      {
        aborted = Some(abort);
        break;
      }
    }

    let progress = tracker.snapshot();
    let outcome = match aborted {
      Some((item, error)) => RunOutcome::Aborted { item, error },
      None if progress.done < progress.total && cancel.is_cancelled() => RunOutcome::Cancelled,
      None => RunOutcome::Completed,
    };

    RunSummary { progress, outcome }
  }

  /// Returns the label and error of the item that ended the run, if any.
  async fn run_chunk<'a, T, F, Fut>(
    &self,
    chunk: &'a [T],
    base: usize,
    tracker: &Tracker,
    cancel: &CancellationToken,
    execute_one: &F,
  ) -> Option<(String, String)>
  where
    T: RunItem,
    F: Fn(usize, &'a T) -> Fut,
    Fut: Future<Output = Result<(), ScriptError>>,
  {
    let cursor = AtomicUsize::new(0);
    let halted = AtomicBool::new(false);
    let abort: Mutex<Option<(String, String)>> = Mutex::new(None);
    let (cursor, halted, abort_ref) = (&cursor, &halted, &abort);

    let workers = (0..self.concurrency.min(chunk.len())).map(|worker| async move {
      loop {
        if cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
          break;
        }

        let local = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(item) = chunk.get(local) else {
          break;
        };
        let index = base + local;

        match execute_one(index, item).await {
          Ok(()) => {
            let progress = tracker.record(true);
            debug!(run_id = %self.run_id, worker, index, "item_succeeded");
            self.notifier.notify(RunEvent::ItemSucceeded {
              run_id: self.run_id.clone(),
              index,
              label: item.label(),
              progress,
            });
          }
          Err(e) if e.is_cancelled() => {
            debug!(run_id = %self.run_id, worker, index, "item interrupted by cancellation");
            break;
          }
          Err(e) => {
            let progress = tracker.record(false);
            let label = item.label();
            error!(
              run_id = %self.run_id,
              index,
              item = %label,
              status = ?e.status(),
              error = %e,
              "item_failed"
            );
            self.notifier.notify(RunEvent::ItemFailed {
              run_id: self.run_id.clone(),
              index,
              label: label.clone(),
              error: e.to_string(),
              status: e.status(),
              progress,
            });

            if e.is_fatal() {
              halted.store(true, Ordering::SeqCst);
              abort_ref
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert((label, e.to_string()));
              break;
            }
          }
        }
      }
    });

    join_all(workers).await;

    abort.into_inner().unwrap_or_else(PoisonError::into_inner)
  }
}
