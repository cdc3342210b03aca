//! Run events and notifiers for observability.
//!
//! Events are emitted while a run executes so consumers can render progress,
//! persist a report or stream it elsewhere.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::runner::{RunProgress, RunSummary};

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
  /// The plan is ready and execution begins.
  RunStarted {
    run_id: String,
    script_id: String,
    progress: RunProgress,
  },

  /// A chunk of the plan is about to execute.
  ChunkStarted {
    run_id: String,
    chunk: usize,
    chunks: usize,
    size: usize,
  },

  /// An item executed successfully.
  ItemSucceeded {
    run_id: String,
    index: usize,
    label: String,
    progress: RunProgress,
  },

  /// An item failed.
  ItemFailed {
    run_id: String,
    index: usize,
    label: String,
    error: String,
    status: Option<u16>,
    progress: RunProgress,
  },

  /// The run is over, successfully or not.
  RunFinished { run_id: String, summary: RunSummary },
}

impl RunEvent {
  /// The progress snapshot carried by this event, if any.
  pub fn progress(&self) -> Option<RunProgress> {
    match self {
      Self::RunStarted { progress, .. }
      | Self::ItemSucceeded { progress, .. }
      | Self::ItemFailed { progress, .. } => Some(*progress),
      Self::RunFinished { summary, .. } => Some(summary.progress),
      Self::ChunkStarted { .. } => None,
    }
  }
}

/// Trait for receiving run events.
///
/// `notify` is called inline after every item, so implementations must be
/// cheap and must not block.
pub trait RunNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl RunNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the workers; one event per item.
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl RunNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Adapts a plain `{total, done, ok, fail}` callback.
///
/// The callback fires when the run starts and after every item.
pub struct ProgressFn<F>(pub F);

impl<F> RunNotifier for ProgressFn<F>
where
  F: Fn(RunProgress) + Send + Sync,
{
  fn notify(&self, event: RunEvent) {
    match event {
      RunEvent::RunStarted { progress, .. }
      | RunEvent::ItemSucceeded { progress, .. }
      | RunEvent::ItemFailed { progress, .. } => (self.0)(progress),
      RunEvent::ChunkStarted { .. } | RunEvent::RunFinished { .. } => {}
    }
  }
}
