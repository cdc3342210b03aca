//! The engine: one context object per process.
//!
//! Owns the script registry, the reference cache and the API client, and
//! drives scripts through preview, plan and execution.

use std::sync::Arc;
use std::time::Duration;

use bulkops_collect::ReferenceCache;
use bulkops_config::{FieldOption, ScriptValues, Settings};
use bulkops_transport::{ApiClient, RetryPolicy, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{EngineError, ScriptError};
use crate::events::{RunEvent, RunNotifier};
use crate::registry::ScriptRegistry;
use crate::runner::{BatchRunner, RunOutcome, RunProgress, RunSummary};
use crate::script::{PREVIEW_LIMIT, Plan, Script, ScriptContext};

/// Run and request behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
  pub base_url: String,
  pub concurrency: usize,
  pub chunk_size: usize,
  pub timeout: Duration,
  pub retry: RetryPolicy,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self::from(&Settings::default())
  }
}

impl From<&Settings> for EngineSettings {
  fn from(settings: &Settings) -> Self {
    let settings = settings.clone().normalized();
    Self {
      base_url: settings.base_url,
      concurrency: settings.concurrency,
      chunk_size: settings.chunk_size,
      timeout: Duration::from_millis(settings.timeout_ms),
      retry: RetryPolicy::default().with_max_attempts(settings.max_attempts),
    }
  }
}

/// The bulk operation engine.
pub struct Engine {
  registry: ScriptRegistry,
  cache: ReferenceCache,
  client: ApiClient,
  settings: EngineSettings,
}

impl Engine {
  pub fn new(transport: Arc<dyn Transport>, settings: EngineSettings) -> Self {
    let client = ApiClient::new(transport, settings.base_url.clone())
      .with_timeout(settings.timeout)
      .with_retry_policy(settings.retry.clone());

    Self {
      registry: ScriptRegistry::new(),
      cache: ReferenceCache::new(),
      client,
      settings,
    }
  }

  pub fn register_scripts(&mut self, scripts: impl IntoIterator<Item = Arc<dyn Script>>) {
    self.registry.register_all(scripts);
    info!(scripts = self.registry.len(), "scripts registered");
  }

  pub fn registry(&self) -> &ScriptRegistry {
    &self.registry
  }

  pub fn cache(&self) -> &ReferenceCache {
    &self.cache
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  pub fn script(&self, script_id: &str) -> Result<Arc<dyn Script>, EngineError> {
    self
      .registry
      .get(script_id)
      .ok_or_else(|| EngineError::UnknownScript {
        id: script_id.to_string(),
      })
  }

  /// A script context bound to `cancel`.
  pub fn context(&self, cancel: CancellationToken) -> ScriptContext {
    ScriptContext::new(self.client.clone(), self.cache.clone(), cancel)
  }

  /// Fill defaults for every field the script declares.
  pub fn prepare_values(&self, script: &dyn Script, values: ScriptValues) -> ScriptValues {
    values.with_defaults(&script.fields())
  }

  pub async fn load_options(
    &self,
    script_id: &str,
    field: &str,
    values: ScriptValues,
    cancel: &CancellationToken,
  ) -> Result<Vec<FieldOption>, EngineError> {
    let script = self.script(script_id)?;
    let values = self.prepare_values(script.as_ref(), values);
    let ctx = self.context(cancel.clone());
    script
      .load_options(field, &values, &ctx)
      .await
      .map_err(|source| script_failure(script_id, source))
  }

  /// Reload the reference data a script caches.
  pub async fn refresh(
    &self,
    script_id: &str,
    values: ScriptValues,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let script = self.script(script_id)?;
    let values = self.prepare_values(script.as_ref(), values);
    let ctx = self.context(cancel.clone());
    script
      .refresh(&values, &ctx)
      .await
      .map_err(|source| script_failure(script_id, source))
  }

  /// Read-only look at the first [`PREVIEW_LIMIT`] items.
  pub async fn preview(
    &self,
    script_id: &str,
    values: ScriptValues,
    cancel: &CancellationToken,
  ) -> Result<Plan, EngineError> {
    let script = self.script(script_id)?;
    let values = self.prepare_values(script.as_ref(), values);
    let ctx = self.context(cancel.clone());
    let mut plan = script
      .preview(&values, &ctx)
      .await
      .map_err(|source| script_failure(script_id, source))?;
    plan.items.truncate(PREVIEW_LIMIT);
    Ok(plan)
  }

  pub async fn plan(
    &self,
    script_id: &str,
    values: ScriptValues,
    cancel: &CancellationToken,
  ) -> Result<Plan, EngineError> {
    let script = self.script(script_id)?;
    let values = self.prepare_values(script.as_ref(), values);
    let ctx = self.context(cancel.clone());
    let plan = script
      .plan(&values, &ctx)
      .await
      .map_err(|source| script_failure(script_id, source))?;

    info!(
      script_id,
      items = plan.items.len(),
      records = plan.record_count(),
      scanned = plan.scanned,
      "plan_ready"
    );
    Ok(plan)
  }

  /// Execute an already computed plan.
  pub async fn execute_plan(
    &self,
    script_id: &str,
    plan: &Plan,
    values: ScriptValues,
    notifier: &dyn RunNotifier,
    cancel: &CancellationToken,
  ) -> Result<RunSummary, EngineError> {
    let script = self.script(script_id)?;
    let values = self.prepare_values(script.as_ref(), values);
    let run_id = uuid::Uuid::new_v4().to_string();
    Ok(
      self
        .execute_with(script.as_ref(), plan, &values, &run_id, notifier, cancel)
        .await,
    )
  }

  /// Plan, then execute the plan chunk by chunk.
  ///
  /// Cancellation while planning ends the run as cancelled with nothing done.
  #[instrument(name = "run", skip(self, values, notifier, cancel))]
  pub async fn run(
    &self,
    script_id: &str,
    values: ScriptValues,
    run_id: &str,
    notifier: &dyn RunNotifier,
    cancel: &CancellationToken,
  ) -> Result<RunSummary, EngineError> {
    let script = self.script(script_id)?;
    let values = self.prepare_values(script.as_ref(), values);
    let ctx = self.context(cancel.clone());

    let plan = match script.plan(&values, &ctx).await {
      Ok(plan) => plan,
      Err(e) if e.is_cancelled() => {
        warn!(run_id, script_id, "run cancelled while planning");
        let summary = RunSummary {
          progress: RunProgress::default(),
          outcome: RunOutcome::Cancelled,
        };
        notifier.notify(RunEvent::RunFinished {
          run_id: run_id.to_string(),
          summary: summary.clone(),
        });
        return Ok(summary);
      }
      Err(source) => return Err(script_failure(script_id, source)),
    };

    Ok(
      self
        .execute_with(script.as_ref(), &plan, &values, run_id, notifier, cancel)
        .await,
    )
  }

  /// Plan and execute in a background task.
  pub fn start(
    self: &Arc<Self>,
    script_id: &str,
    values: ScriptValues,
    notifier: Arc<dyn RunNotifier>,
  ) -> RunHandle {
    let run_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
      let engine = Arc::clone(self);
      let script_id = script_id.to_string();
      let run_id = run_id.clone();
      let cancel = cancel.clone();
      async move {
        engine
          .run(&script_id, values, &run_id, notifier.as_ref(), &cancel)
          .await
      }
    });

    RunHandle {
      run_id,
      cancel,
      task,
    }
  }

  async fn execute_with(
    &self,
    script: &dyn Script,
    plan: &Plan,
    values: &ScriptValues,
    run_id: &str,
    notifier: &dyn RunNotifier,
    cancel: &CancellationToken,
  ) -> RunSummary {
    let ctx = self.context(cancel.clone());

    info!(
      run_id,
      script_id = script.id(),
      items = plan.items.len(),
      concurrency = self.settings.concurrency,
      chunk_size = self.settings.chunk_size,
      "run_started"
    );
    notifier.notify(RunEvent::RunStarted {
      run_id: run_id.to_string(),
      script_id: script.id().to_string(),
      progress: RunProgress {
        total: plan.items.len(),
        ..RunProgress::default()
      },
    });

    let ctx = &ctx;
    let summary = BatchRunner::new(self.settings.concurrency, notifier)
      .with_run_id(run_id)
      .run_chunked(
        &plan.items,
        self.settings.chunk_size,
        cancel,
        move |_, item| script.execute(item, values, ctx),
      )
      .await;

    info!(
      run_id,
      total = summary.progress.total,
      ok = summary.progress.ok,
      fail = summary.progress.fail,
      outcome = ?summary.outcome,
      "run_finished"
    );
    notifier.notify(RunEvent::RunFinished {
      run_id: run_id.to_string(),
      summary: summary.clone(),
    });

    summary
  }
}

fn script_failure(script_id: &str, source: ScriptError) -> EngineError {
  EngineError::Script {
    script_id: script_id.to_string(),
    source,
  }
}

/// A run executing in the background.
///
/// Call `.wait()` for the summary. Dropping the handle detaches the run.
pub struct RunHandle {
  run_id: String,
  cancel: CancellationToken,
  task: JoinHandle<Result<RunSummary, EngineError>>,
}

impl RunHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Stop claiming new items and abort in-flight requests.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub async fn wait(self) -> Result<RunSummary, EngineError> {
    self.task.await.map_err(|e| EngineError::Join {
      message: e.to_string(),
    })?
  }
}
