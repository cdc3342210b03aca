//! Replace target permission bundles with a single replacement bundle.
//!
//! Every user holding at least one target bundle loses all of them and gains
//! the replacement. Users are written back one `PUT` each.

use std::ops::ControlFlow;

use async_trait::async_trait;
use bulkops_collect::{Paginator, ReferenceSet};
use bulkops_config::{FieldKind, FieldOption, FieldSpec, ScriptValues};
use bulkops_engine::{
  Change, ChangeSummary, MembershipRule, MutationItem, PREVIEW_LIMIT, Plan, PlanItem,
  RelationSet, Script, ScriptContext, ScriptError,
};
use bulkops_transport::{Method, Request, expand_path};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::catalog::{self, Catalog};
use crate::users;

pub const ID: &str = "perm_reassign";

const MISSING_SELECTION: &str = "select target bundles and a replacement bundle before previewing";

#[derive(Debug, Clone, PartialEq)]
struct ReassignConfig {
  targets: RelationSet,
  replacement: i64,
  limit: u64,
  page_size: u64,
  list_path: String,
  bundles_path: String,
  update_path: String,
  stop_on_error: bool,
  skip_if_has_replacement: bool,
}

impl ReassignConfig {
  fn parse(values: &ScriptValues) -> Result<Self, ScriptError> {
    let targets = values.ids("targetBundles");
    let replacement = values
      .id("replacementBundle")
      .filter(|id| *id > 0 && !targets.is_empty());
    let Some(replacement) = replacement else {
      return Err(ScriptError::configuration(MISSING_SELECTION));
    };

    Ok(Self {
      targets,
      replacement,
      limit: values.u64_or("limit", 0)?,
      page_size: values.u64_or("pageSize", 50)?.max(1),
      list_path: values.text_or("listPath", "/users"),
      bundles_path: bundles_path(values),
      update_path: values.text_or("userUpdatePath", "/users/{id}"),
      stop_on_error: values.flag_or("stopOnError", false),
      skip_if_has_replacement: values.flag_or("skipIfHasReplacement", true),
    })
  }

  fn rule(&self) -> MembershipRule {
    MembershipRule::Reassign {
      targets: self.targets.clone(),
      replacement: self.replacement,
    }
  }
}

fn bundles_path(values: &ScriptValues) -> String {
  values.text_or("bundlesPath", "/bundles")
}

/// The permission bundle reassignment script.
#[derive(Debug, Default)]
pub struct PermReassign;

impl PermReassign {
  pub fn new() -> Self {
    Self
  }

  async fn collect(
    &self,
    cfg: &ReassignConfig,
    limit: u64,
    ctx: &ScriptContext,
  ) -> Result<Plan, ScriptError> {
    let bundles = Catalog::Bundles.load(&cfg.bundles_path, false, ctx).await?;
    let rule = cfg.rule();

    let mut items = Vec::new();
    let stats = users::listing(ctx.client(), &cfg.list_path)
      .scan(&Paginator::new(cfg.page_size), ctx.cancel(), |user| {
        if let Some(item) = match_user(user, cfg, &rule, &bundles) {
          items.push(PlanItem::Record(item));
        }
        if limit > 0 && items.len() as u64 >= limit {
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      })
      .await?;

    info!(
      script_id = ID,
      queued = items.len(),
      scanned = stats.scanned,
      pages = stats.pages,
      limited = stats.stopped_early,
      "users collected"
    );

    Ok(Plan {
      items,
      scanned: stats.scanned,
    })
  }
}

fn match_user(
  user: Value,
  cfg: &ReassignConfig,
  rule: &MembershipRule,
  bundles: &ReferenceSet,
) -> Option<MutationItem> {
  let current = users::bundle_ids(&user);
  let has_target = !current.is_disjoint(&cfg.targets);
  let has_replacement = current.contains(&cfg.replacement);

  if cfg.skip_if_has_replacement && has_replacement && !has_target {
    return None;
  }
  if !has_target {
    return None;
  }

  let Change::Mutate { current, next } = rule.diff(&current) else {
    return None;
  };
  let id = users::user_id(&user)?;

  Some(MutationItem {
    id,
    display_name: users::display_name(&user),
    summary: ChangeSummary {
      current: bundles.labels(&current),
      next: bundles.labels(&next),
      note: None,
    },
    current_state: current,
    next_state: next,
    record: user,
  })
}

/// `{user: {...}}` carrying the new bundles plus the fields the update
/// endpoint expects back.
fn update_payload(item: &MutationItem) -> Value {
  let user = &item.record;
  let mut payload = Map::new();

  payload.insert(
    "id".into(),
    user
      .get("id")
      .filter(|id| !id.is_null())
      .cloned()
      .unwrap_or_else(|| json!(item.id)),
  );
  payload.insert("permission_bundles".into(), json!(item.next_state));

  for key in ["first_name", "last_name", "email"] {
    if let Some(value) = user.get(key).filter(|v| !v.is_null()) {
      payload.insert(key.into(), value.clone());
    }
  }

  if let Some(groups) = user.get("user_groups").and_then(Value::as_array) {
    let groups: Vec<Value> = groups
      .iter()
      .filter(|group| !group["id"].is_null())
      .map(|group| json!({"id": group["id"], "name": group["name"]}))
      .collect();
    payload.insert("user_groups".into(), Value::Array(groups));
  }

  if let Some(locations) = user.get("locations").and_then(Value::as_array) {
    let ids: Vec<Value> = locations
      .iter()
      .map(|location| location["id"].clone())
      .filter(|id| !id.is_null())
      .collect();
    payload.insert("location_ids".into(), Value::Array(ids));
  }

  json!({ "user": payload })
}

#[async_trait]
impl Script for PermReassign {
  fn id(&self) -> &str {
    ID
  }

  fn name(&self) -> &str {
    "Users: reassign permission bundles"
  }

  fn fields(&self) -> Vec<FieldSpec> {
    vec![
      FieldSpec::new(FieldKind::Button, "refreshBundles", "Fetch permission bundles"),
      FieldSpec::new(FieldKind::Multiselect, "targetBundles", "Target bundles")
        .required()
        .loads_options(&["bundlesPath"])
        .with_placeholder("Select permission bundles to replace"),
      FieldSpec::new(FieldKind::Select, "replacementBundle", "Replacement bundle")
        .required()
        .loads_options(&["bundlesPath"])
        .with_placeholder("Select replacement bundle"),
      FieldSpec::new(FieldKind::Number, "limit", "Process max users (0 = all)").with_default(0),
      FieldSpec::new(FieldKind::Number, "pageSize", "Page size").with_default(50),
      FieldSpec::new(FieldKind::Text, "listPath", "Users list path")
        .required()
        .with_default("/users"),
      FieldSpec::new(FieldKind::Text, "bundlesPath", "Bundles list path")
        .required()
        .with_default("/bundles"),
      FieldSpec::new(FieldKind::Text, "userUpdatePath", "User update path")
        .required()
        .with_default("/users/{id}"),
      FieldSpec::new(FieldKind::Checkbox, "stopOnError", "Stop on first error").with_default(false),
      FieldSpec::new(
        FieldKind::Checkbox,
        "skipIfHasReplacement",
        "Skip users already assigned replacement bundle",
      )
      .with_default(true),
    ]
  }

  async fn load_options(
    &self,
    field: &str,
    values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<Vec<FieldOption>, ScriptError> {
    match field {
      "targetBundles" | "replacementBundle" => {
        let bundles = Catalog::Bundles.load(&bundles_path(values), false, ctx).await?;
        Ok(catalog::options(&bundles))
      }
      other => Err(ScriptError::configuration(format!(
        "field '{other}' has no loadable options"
      ))),
    }
  }

  async fn refresh(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<(), ScriptError> {
    let bundles = Catalog::Bundles.load(&bundles_path(values), true, ctx).await?;
    info!(script_id = ID, bundles = bundles.len(), "permission bundles refreshed");
    Ok(())
  }

  async fn preview(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError> {
    let cfg = ReassignConfig::parse(values)?;
    let limit = match cfg.limit {
      0 => PREVIEW_LIMIT as u64,
      limit => limit.min(PREVIEW_LIMIT as u64),
    };
    self.collect(&cfg, limit, ctx).await
  }

  async fn plan(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError> {
    let cfg = ReassignConfig::parse(values)?;
    self.collect(&cfg, cfg.limit, ctx).await
  }

  async fn execute(
    &self,
    item: &PlanItem,
    values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<(), ScriptError> {
    let cfg = ReassignConfig::parse(values)?;

    for record in item.records() {
      let request = Request::new(Method::PUT, expand_path(&cfg.update_path, &record.id))
        .json(update_payload(record));

      ctx
        .client()
        .send_ok(request, ctx.cancel())
        .await
        .map_err(|e| ScriptError::from(e).escalate(record.label(), cfg.stop_on_error))?;

      debug!(script_id = ID, user = %record.label(), bundles = ?record.next_state, "user updated");
    }

    Ok(())
  }
}
