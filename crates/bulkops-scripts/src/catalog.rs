//! Reference catalogs the scripts label and select with.

use std::sync::Arc;

use bulkops_collect::{ListShape, Listing, ReferenceSet};
use bulkops_config::FieldOption;
use bulkops_engine::{ScriptContext, ScriptError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Catalog {
  Bundles,
  Locations,
  Groups,
}

impl Catalog {
  fn entity(self) -> &'static str {
    match self {
      Self::Bundles => "bundles",
      Self::Locations => "locations",
      Self::Groups => "user_groups",
    }
  }

  fn guard_limit(self) -> usize {
    match self {
      Self::Bundles | Self::Locations => 500,
      Self::Groups => 200,
    }
  }

  fn name_keys(self) -> &'static [&'static str] {
    match self {
      Self::Bundles => &["bundle_name", "name"],
      Self::Locations | Self::Groups => &["name"],
    }
  }

  /// Load the catalog listed at `path` through the shared cache. `force`
  /// replaces whatever is cached.
  pub(crate) async fn load(
    self,
    path: &str,
    force: bool,
    ctx: &ScriptContext,
  ) -> Result<Arc<ReferenceSet>, ScriptError> {
    let listing = Listing::new(ctx.client(), path, ListShape::new(self.entity()));
    let key = listing.url().to_string();
    let loader = || listing.load_reference_set(self.guard_limit(), self.name_keys(), ctx.cancel());

    let set = if force {
      ctx.cache().reload(&key, loader).await?
    } else {
      ctx.cache().ensure_cached(&key, loader).await?
    };

    debug!(catalog = self.entity(), url = %key, entries = set.len(), force, "catalog ready");
    Ok(set)
  }
}

/// Select options for every entry, sorted by label.
pub(crate) fn options(set: &ReferenceSet) -> Vec<FieldOption> {
  let mut options: Vec<_> = set
    .iter()
    .map(|entry| FieldOption::new(entry.id.to_string(), entry.label()))
    .collect();
  options.sort_by(|a, b| a.label.cmp(&b.label));
  options
}
