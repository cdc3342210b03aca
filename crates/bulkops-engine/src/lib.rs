//! Bulkops Engine
//!
//! Drives bulk operations ("scripts") against a paginated REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - owns ScriptRegistry, ReferenceCache, ApiClient           │
//! │  - preview / plan / start(script_id, values) → RunHandle    │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       dyn Script                            │
//! │  - plan: Listing + ReferenceCache + MembershipRule → Plan   │
//! │  - execute(item) → one HTTP call per PlanItem               │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BatchRunner                           │
//! │  - chunk by chunk, N workers on a shared cursor             │
//! │  - RunEvent → RunNotifier after every item                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = Engine::new(transport, EngineSettings::from(&settings));
//! engine.register_scripts(bulkops_scripts::all());
//! let engine = Arc::new(engine);
//!
//! let handle = engine.start("perm_reassign", values, Arc::new(NoopNotifier));
//! let summary = handle.wait().await?;
//! ```

mod diff;
mod engine;
mod error;
mod events;
mod registry;
mod runner;
mod script;

pub use diff::{Change, MembershipRule, RelationSet};
pub use engine::{Engine, EngineSettings, RunHandle};
pub use error::{EngineError, ScriptError};
pub use events::{ChannelNotifier, NoopNotifier, ProgressFn, RunEvent, RunNotifier};
pub use registry::ScriptRegistry;
pub use runner::{BatchRunner, RunItem, RunOutcome, RunProgress, RunSummary};
pub use script::{
  BatchItem, ChangeSummary, MutationItem, PREVIEW_LIMIT, Plan, PlanItem, Script, ScriptContext,
};
