use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bulkops_collect::{ListShape, Listing, Paginator};
use bulkops_config::{FieldKind, FieldSpec, ScriptValues};
use bulkops_engine::{
  Change, ChangeSummary, ChannelNotifier, Engine, EngineError, EngineSettings, MembershipRule,
  MutationItem, NoopNotifier, PREVIEW_LIMIT, Plan, PlanItem, ProgressFn, RelationSet, RunEvent,
  RunOutcome, RunProgress, Script, ScriptContext, ScriptError,
};
use bulkops_transport::mock::ScriptedTransport;
use bulkops_transport::{Method, Request, Response, RetryPolicy};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const BASE: &str = "https://api.test";

/// Adds one tag to every widget that lacks it.
struct TagWidgets;

#[async_trait]
impl Script for TagWidgets {
  fn id(&self) -> &str {
    "tag_widgets"
  }

  fn name(&self) -> &str {
    "Widgets: add tag"
  }

  fn fields(&self) -> Vec<FieldSpec> {
    vec![
      FieldSpec::new(FieldKind::Number, "tag", "Tag").required(),
      FieldSpec::new(FieldKind::Number, "pageSize", "Page size").with_default(100),
    ]
  }

  async fn preview(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError> {
    self.plan(values, ctx).await
  }

  async fn plan(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError> {
    values.validate(&self.fields())?;
    let tag = values
      .id("tag")
      .ok_or_else(|| ScriptError::configuration("tag must be numeric"))?;
    let rule = MembershipRule::Augment { id: tag };

    let listing = Listing::new(ctx.client(), "/widgets", ListShape::new("widgets"));
    let paginator = Paginator::new(values.u64_or("pageSize", 100)?);
    let records = listing.collect(&paginator, ctx.cancel()).await?;
    let scanned = records.len();

    let items = records
      .into_iter()
      .filter_map(|record| {
        let current: RelationSet = record["tags"]
          .as_array()?
          .iter()
          .filter_map(Value::as_i64)
          .collect();
        let Change::Mutate { current, next } = rule.diff(&current) else {
          return None;
        };
        Some(PlanItem::Record(MutationItem {
          id: record["id"].to_string(),
          display_name: record["name"].as_str().unwrap_or_default().to_string(),
          current_state: current,
          next_state: next,
          summary: ChangeSummary::default(),
          record,
        }))
      })
      .collect();

    Ok(Plan { items, scanned })
  }

  async fn execute(
    &self,
    item: &PlanItem,
    _values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<(), ScriptError> {
    let PlanItem::Record(item) = item else {
      return Err(ScriptError::configuration("expected a record item"));
    };
    let request = Request::new(Method::PUT, format!("/widgets/{}", item.id))
      .json(json!({ "tags": item.next_state }));
    ctx.client().send_ok(request, ctx.cancel()).await?;
    Ok(())
  }
}

type Widgets = Arc<Mutex<BTreeMap<i64, Vec<i64>>>>;

fn query_param(url: &str, name: &str) -> usize {
  url
    .split_once('?')
    .map(|(_, query)| query)
    .unwrap_or_default()
    .split('&')
    .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

/// A fake widget API whose state changes with every successful PUT.
fn create_test_api(transport: &ScriptedTransport, count: i64) -> Widgets {
  let widgets: Widgets = Arc::new(Mutex::new(
    (1..=count).map(|id| (id, if id % 2 == 0 { vec![9] } else { vec![] })).collect(),
  ));

  let state = widgets.clone();
  transport.route(Method::GET, &format!("{BASE}/widgets"), move |request| {
    let offset = query_param(&request.url, "offset");
    let limit = query_param(&request.url, "limit");
    let page: Vec<Value> = state
      .lock()
      .unwrap()
      .iter()
      .skip(offset)
      .take(limit)
      .map(|(id, tags)| json!({"id": id, "name": format!("widget {id}"), "tags": tags}))
      .collect();
    Ok(Response::new(200, json!({ "widgets": page })))
  });

  for id in 1..=count {
    let state = widgets.clone();
    transport.route(Method::PUT, &format!("{BASE}/widgets/{id}"), move |request| {
      let tags: Vec<i64> = request
        .body
        .as_ref()
        .and_then(|body| body["tags"].as_array())
        .map(|tags| tags.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
      state.lock().unwrap().insert(id, tags);
      Ok(Response::new(204, Value::Null))
    });
  }

  widgets
}

fn create_test_engine(transport: Arc<ScriptedTransport>) -> Arc<Engine> {
  let mut engine = Engine::new(
    transport,
    EngineSettings {
      base_url: BASE.to_string(),
      concurrency: 2,
      chunk_size: 3,
      timeout: Duration::from_secs(5),
      retry: RetryPolicy::default().without_jitter(),
    },
  );
  engine.register_scripts([Arc::new(TagWidgets) as Arc<dyn Script>]);
  Arc::new(engine)
}

fn tag(id: i64) -> ScriptValues {
  ScriptValues::new().with("tag", id)
}

#[tokio::test]
async fn test_run_then_replan_is_empty() {
  let transport = Arc::new(ScriptedTransport::new());
  let widgets = create_test_api(&transport, 7);
  let engine = create_test_engine(transport.clone());
  let cancel = CancellationToken::new();

  let first = engine.plan("tag_widgets", tag(9), &cancel).await.unwrap();
  let again = engine.plan("tag_widgets", tag(9), &cancel).await.unwrap();
  assert_eq!(first, again);
  assert_eq!(first.items.len(), 4);
  assert_eq!(first.scanned, 7);

  let summary = engine
    .start("tag_widgets", tag(9), Arc::new(NoopNotifier))
    .wait()
    .await
    .unwrap();
  assert_eq!(
    summary.progress,
    RunProgress {
      total: 4,
      done: 4,
      ok: 4,
      fail: 0
    }
  );
  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert!(widgets.lock().unwrap().values().all(|tags| tags.contains(&9)));

  let after = engine.plan("tag_widgets", tag(9), &cancel).await.unwrap();
  assert!(after.is_empty());
}

#[tokio::test]
async fn test_execute_reviewed_plan() {
  let transport = Arc::new(ScriptedTransport::new());
  let widgets = create_test_api(&transport, 6);
  let engine = create_test_engine(transport.clone());
  let cancel = CancellationToken::new();

  let plan = engine.plan("tag_widgets", tag(9), &cancel).await.unwrap();
  assert_eq!(plan.items.len(), 3);
  let listed = transport.count(Method::GET, &format!("{BASE}/widgets"));

  let seen = Arc::new(Mutex::new(Vec::new()));
  let notifier = ProgressFn({
    let seen = seen.clone();
    move |progress: RunProgress| seen.lock().unwrap().push(progress.done)
  });
  let summary = engine
    .execute_plan("tag_widgets", &plan, tag(9), &notifier, &cancel)
    .await
    .unwrap();

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(
    summary.progress,
    RunProgress {
      total: 3,
      done: 3,
      ok: 3,
      fail: 0
    }
  );
  assert_eq!(*seen.lock().unwrap(), [0, 1, 2, 3]);

  // The plan is executed as given, without listing again.
  assert_eq!(transport.count(Method::GET, &format!("{BASE}/widgets")), listed);
  for id in [1, 3, 5] {
    assert_eq!(transport.count(Method::PUT, &format!("{BASE}/widgets/{id}")), 1);
  }
  assert_eq!(transport.count(Method::PUT, &format!("{BASE}/widgets/2")), 0);
  assert!(widgets.lock().unwrap().values().all(|tags| tags == &[9]));
}

#[tokio::test]
async fn test_failed_item_is_reported_and_isolated() {
  let transport = Arc::new(ScriptedTransport::new());
  create_test_api(&transport, 5);
  transport.respond(Method::PUT, &format!("{BASE}/widgets/3"), 422, json!({"error": "locked"}));
  let engine = create_test_engine(transport);

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let summary = engine
    .start("tag_widgets", tag(9), Arc::new(ChannelNotifier::new(tx)))
    .wait()
    .await
    .unwrap();

  assert_eq!(summary.progress.ok, 2);
  assert_eq!(summary.progress.fail, 1);
  assert_eq!(summary.outcome, RunOutcome::Completed);

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
  assert!(matches!(events.last(), Some(RunEvent::RunFinished { .. })));

  let failed: Vec<_> = events
    .iter()
    .filter_map(|event| match event {
      RunEvent::ItemFailed { label, status, .. } => Some((label.clone(), *status)),
      _ => None,
    })
    .collect();
  assert_eq!(failed, vec![("widget 3 (#3)".to_string(), Some(422))]);
}

#[tokio::test]
async fn test_preview_is_capped() {
  let transport = Arc::new(ScriptedTransport::new());
  create_test_api(&transport, 240);
  let engine = create_test_engine(transport.clone());
  let cancel = CancellationToken::new();

  let preview = engine.preview("tag_widgets", tag(9), &cancel).await.unwrap();
  assert_eq!(preview.items.len(), PREVIEW_LIMIT);
  assert_eq!(preview.scanned, 240);

  let plan = engine.plan("tag_widgets", tag(9), &cancel).await.unwrap();
  assert_eq!(plan.items.len(), 120);
  assert_eq!(transport.count(Method::PUT, &format!("{BASE}/widgets/1")), 0);
}

#[tokio::test]
async fn test_missing_value_fails_before_any_request() {
  let transport = Arc::new(ScriptedTransport::new());
  create_test_api(&transport, 3);
  let engine = create_test_engine(transport.clone());

  let err = engine
    .plan("tag_widgets", ScriptValues::new(), &CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    EngineError::Script {
      source: ScriptError::Configuration { .. },
      ..
    }
  ));
  assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_unknown_script_is_rejected() {
  let engine = create_test_engine(Arc::new(ScriptedTransport::new()));
  let err = engine
    .start("missing", ScriptValues::new(), Arc::new(NoopNotifier))
    .wait()
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnknownScript { ref id } if id == "missing"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_handle() {
  let transport = Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(50)));
  create_test_api(&transport, 20);
  let engine = create_test_engine(transport.clone());

  let handle = engine.start("tag_widgets", tag(9), Arc::new(NoopNotifier));
  // Two listing pages take 100ms; the first pair of PUTs lands at 150ms.
  tokio::time::sleep(Duration::from_millis(175)).await;
  handle.cancel();
  let summary = handle.wait().await.unwrap();

  assert_eq!(summary.outcome, RunOutcome::Cancelled);
  assert_eq!(summary.progress.total, 10);
  assert!(summary.progress.done < summary.progress.total);
  assert!(summary.progress.done <= 4);
}
