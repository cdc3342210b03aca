//! Bulkops Scripts
//!
//! The bulk operations shipped with bulkops.
//!
//! - [`PermReassign`] (`perm_reassign`): replace target permission bundles
//!   with a replacement bundle, one `PUT` per user.
//! - [`UserGroupAssign`] (`user_group_assign`): add a user group to every
//!   user matched by bundle or location, one batched `POST`.
//!
//! Both list users page by page, label changes with cached reference
//! catalogs and only plan users whose relations actually change.

mod catalog;
mod perm_reassign;
mod user_group_assign;
mod users;

use std::sync::Arc;

use bulkops_engine::Script;

pub use perm_reassign::PermReassign;
pub use user_group_assign::UserGroupAssign;

/// Every built-in script, in menu order.
pub fn all() -> Vec<Arc<dyn Script>> {
  vec![Arc::new(PermReassign::new()), Arc::new(UserGroupAssign::new())]
}
