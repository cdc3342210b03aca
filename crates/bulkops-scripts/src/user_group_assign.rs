//! Add a user group to every user matched by bundle or by location.
//!
//! The group membership endpoint takes many users at once, so the plan is a
//! single batch item and execution is one `POST`.

use std::fmt;
use std::ops::ControlFlow;

use async_trait::async_trait;
use bulkops_collect::{Paginator, ReferenceSet};
use bulkops_config::{FieldKind, FieldOption, FieldSpec, ScriptValues};
use bulkops_engine::{
  BatchItem, Change, ChangeSummary, MembershipRule, MutationItem, PREVIEW_LIMIT, Plan, PlanItem,
  RelationSet, Script, ScriptContext, ScriptError,
};
use bulkops_transport::{Method, Request};
use serde_json::{Value, json};
use tracing::info;

use crate::catalog::{self, Catalog};
use crate::users;

pub const ID: &str = "user_group_assign";

/// Which relation selects users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetMode {
  Bundles,
  Locations,
}

impl TargetMode {
  fn parse(value: &str) -> Self {
    match value {
      "locations" => Self::Locations,
      _ => Self::Bundles,
    }
  }

  fn field(self) -> &'static str {
    match self {
      Self::Bundles => "targetBundles",
      Self::Locations => "targetLocations",
    }
  }

  fn catalog(self) -> Catalog {
    match self {
      Self::Bundles => Catalog::Bundles,
      Self::Locations => Catalog::Locations,
    }
  }

  fn relations(self, user: &Value) -> RelationSet {
    match self {
      Self::Bundles => users::bundle_ids(user),
      Self::Locations => users::location_ids(user),
    }
  }
}

impl fmt::Display for TargetMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Bundles => write!(f, "bundles"),
      Self::Locations => write!(f, "locations"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
struct AssignConfig {
  mode: TargetMode,
  targets: RelationSet,
  group_id: i64,
  limit: u64,
  page_size: u64,
  list_path: String,
  paths: CatalogPaths,
  stop_on_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct CatalogPaths {
  bundles: String,
  locations: String,
  groups: String,
}

impl CatalogPaths {
  fn from_values(values: &ScriptValues) -> Self {
    Self {
      bundles: values.text_or("bundlesPath", "/bundles"),
      locations: values.text_or("locationsPath", "/api/v3/locations"),
      groups: values.text_or("groupsPath", "/user_groups"),
    }
  }

  fn of(&self, catalog: Catalog) -> &str {
    match catalog {
      Catalog::Bundles => &self.bundles,
      Catalog::Locations => &self.locations,
      Catalog::Groups => &self.groups,
    }
  }
}

impl AssignConfig {
  fn parse(values: &ScriptValues) -> Result<Self, ScriptError> {
    let Some(group_id) = values.id("groupId").filter(|id| *id > 0) else {
      return Err(ScriptError::configuration("select a user group to assign"));
    };

    let mode = TargetMode::parse(&values.text_or("mode", "bundles"));
    let targets = values.ids(mode.field());
    if targets.is_empty() {
      let singular = match mode {
        TargetMode::Bundles => "bundle",
        TargetMode::Locations => "location",
      };
      return Err(ScriptError::configuration(format!(
        "select at least one target {singular} when targeting by {mode}"
      )));
    }

    Ok(Self {
      mode,
      targets,
      group_id,
      limit: values.u64_or("limit", 0)?,
      page_size: values.u64_or("pageSize", 50)?.max(1),
      list_path: values.text_or("listPath", "/users"),
      paths: CatalogPaths::from_values(values),
      stop_on_error: values.flag_or("stopOnError", false),
    })
  }

  fn members_path(&self) -> String {
    format!(
      "{}/{}/users",
      self.paths.groups.trim_end_matches('/'),
      self.group_id
    )
  }
}

/// The user group assignment script.
#[derive(Debug, Default)]
pub struct UserGroupAssign;

impl UserGroupAssign {
  pub fn new() -> Self {
    Self
  }

  /// Every matching user, one record item each.
  async fn collect(
    &self,
    cfg: &AssignConfig,
    limit: u64,
    ctx: &ScriptContext,
  ) -> Result<(Vec<MutationItem>, usize), ScriptError> {
    let groups = Catalog::Groups.load(&cfg.paths.groups, false, ctx).await?;
    let matched_by = cfg.mode.catalog();
    let targets = matched_by.load(cfg.paths.of(matched_by), false, ctx).await?;
    let rule = MembershipRule::Augment { id: cfg.group_id };

    let mut members = Vec::new();
    let stats = users::listing(ctx.client(), &cfg.list_path)
      .scan(&Paginator::new(cfg.page_size), ctx.cancel(), |user| {
        if let Some(member) = match_user(user, cfg, &rule, &groups, &targets) {
          members.push(member);
        }
        if limit > 0 && members.len() as u64 >= limit {
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      })
      .await?;

    info!(
      script_id = ID,
      mode = %cfg.mode,
      group_id = cfg.group_id,
      queued = members.len(),
      scanned = stats.scanned,
      limited = stats.stopped_early,
      "users collected"
    );

    Ok((members, stats.scanned))
  }
}

fn match_user(
  user: Value,
  cfg: &AssignConfig,
  rule: &MembershipRule,
  groups: &ReferenceSet,
  targets: &ReferenceSet,
) -> Option<MutationItem> {
  let matched: RelationSet = cfg
    .mode
    .relations(&user)
    .intersection(&cfg.targets)
    .copied()
    .collect();
  if matched.is_empty() {
    return None;
  }

  let Change::Mutate { current, next } = rule.diff(&users::group_ids(&user)) else {
    return None;
  };
  let id = users::user_id(&user)?;

  Some(MutationItem {
    id,
    display_name: users::display_name(&user),
    summary: ChangeSummary {
      current: groups.labels(&current),
      next: groups.labels(&next),
      note: Some(format!(
        "matched by {}: {}",
        cfg.mode,
        targets.labels(&matched).join(", ")
      )),
    },
    current_state: current,
    next_state: next,
    record: user,
  })
}

/// The id as the listing returned it, so numeric ids stay numbers.
fn member_id(member: &MutationItem) -> Value {
  match member.record.get("id") {
    Some(id) if !id.is_null() => id.clone(),
    _ => json!(member.id),
  }
}

#[async_trait]
impl Script for UserGroupAssign {
  fn id(&self) -> &str {
    ID
  }

  fn name(&self) -> &str {
    "Users: assign user group (by bundles or locations)"
  }

  fn fields(&self) -> Vec<FieldSpec> {
    vec![
      FieldSpec::new(
        FieldKind::Button,
        "refreshReferenceData",
        "Fetch bundles/locations/groups",
      ),
      FieldSpec::new(FieldKind::Select, "mode", "Targeting mode")
        .required()
        .with_default("bundles")
        .with_options(vec![
          FieldOption::new("bundles", "By permission bundles"),
          FieldOption::new("locations", "By locations"),
        ]),
      FieldSpec::new(FieldKind::Multiselect, "targetBundles", "Target bundles")
        .loads_options(&["bundlesPath"])
        .with_placeholder("Select permission bundles to target"),
      FieldSpec::new(FieldKind::Multiselect, "targetLocations", "Target locations")
        .loads_options(&["locationsPath"])
        .with_placeholder("Select locations to target"),
      FieldSpec::new(FieldKind::Select, "groupId", "User group to assign")
        .required()
        .loads_options(&["groupsPath"])
        .with_placeholder("Select a user group"),
      FieldSpec::new(FieldKind::Number, "limit", "Process max users (0 = all)").with_default(0),
      FieldSpec::new(FieldKind::Number, "pageSize", "Page size").with_default(50),
      FieldSpec::new(FieldKind::Text, "listPath", "Users list path")
        .required()
        .with_default("/users"),
      FieldSpec::new(FieldKind::Text, "bundlesPath", "Bundles list path")
        .required()
        .with_default("/bundles"),
      FieldSpec::new(FieldKind::Text, "locationsPath", "Locations list path")
        .required()
        .with_default("/api/v3/locations"),
      FieldSpec::new(FieldKind::Text, "groupsPath", "User groups base path")
        .required()
        .with_default("/user_groups"),
      FieldSpec::new(FieldKind::Checkbox, "stopOnError", "Stop on first error").with_default(false),
    ]
  }

  async fn load_options(
    &self,
    field: &str,
    values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<Vec<FieldOption>, ScriptError> {
    let catalog = match field {
      "targetBundles" => Catalog::Bundles,
      "targetLocations" => Catalog::Locations,
      "groupId" => Catalog::Groups,
      other => {
        return Err(ScriptError::configuration(format!(
          "field '{other}' has no loadable options"
        )));
      }
    };
    let paths = CatalogPaths::from_values(values);
    let set = catalog.load(paths.of(catalog), false, ctx).await?;
    Ok(catalog::options(&set))
  }

  async fn refresh(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<(), ScriptError> {
    let paths = CatalogPaths::from_values(values);
    let (bundles, locations, groups) = tokio::join!(
      Catalog::Bundles.load(&paths.bundles, true, ctx),
      Catalog::Locations.load(&paths.locations, true, ctx),
      Catalog::Groups.load(&paths.groups, true, ctx),
    );
    let (bundles, locations, groups) = (bundles?, locations?, groups?);

    info!(
      script_id = ID,
      bundles = bundles.len(),
      locations = locations.len(),
      groups = groups.len(),
      "reference data refreshed"
    );
    Ok(())
  }

  /// One record item per matching user, so the operator sees who is added.
  async fn preview(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError> {
    let cfg = AssignConfig::parse(values)?;
    let limit = match cfg.limit {
      0 => PREVIEW_LIMIT as u64,
      limit => limit.min(PREVIEW_LIMIT as u64),
    };
    let (members, scanned) = self.collect(&cfg, limit, ctx).await?;

    Ok(Plan {
      items: members.into_iter().map(PlanItem::Record).collect(),
      scanned,
    })
  }

  async fn plan(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError> {
    let cfg = AssignConfig::parse(values)?;
    let (members, scanned) = self.collect(&cfg, cfg.limit, ctx).await?;

    let items = if members.is_empty() {
      Vec::new()
    } else {
      vec![PlanItem::Batch(BatchItem {
        ids: members.iter().map(|m| m.id.clone()).collect(),
        members,
      })]
    };

    Ok(Plan { items, scanned })
  }

  async fn execute(
    &self,
    item: &PlanItem,
    values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<(), ScriptError> {
    let cfg = AssignConfig::parse(values)?;
    let members: Vec<Value> = item.records().iter().map(member_id).collect();
    if members.is_empty() {
      return Ok(());
    }

    info!(
      script_id = ID,
      group_id = cfg.group_id,
      users = members.len(),
      "adding users to group"
    );
    let request =
      Request::new(Method::POST, cfg.members_path()).json(json!({ "members": members }));

    ctx
      .client()
      .send_ok(request, ctx.cancel())
      .await
      .map_err(|e| ScriptError::from(e).escalate(item.label(), cfg.stop_on_error))?;

    Ok(())
  }
}
