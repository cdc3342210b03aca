//! Membership diff rules.
//!
//! A record's relations (bundle, location or group ids) are a sorted set. A
//! rule maps the current set to the next one; the record needs a mutation only
//! when the two differ, which makes re-running a plan against unchanged remote
//! state a no-op.

use std::collections::BTreeSet;

/// Relation ids of one record, sorted ascending.
pub type RelationSet = BTreeSet<i64>;

/// How a record's relation set should change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipRule {
  /// Remove every id in `targets`, then add `replacement`.
  Reassign {
    targets: RelationSet,
    replacement: i64,
  },
  /// Add `id`; never removes anything.
  Augment { id: i64 },
}

/// The outcome of applying a rule to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
  NoOp,
  Mutate {
    current: RelationSet,
    next: RelationSet,
  },
}

impl MembershipRule {
  pub fn next_state(&self, current: &RelationSet) -> RelationSet {
    match self {
      Self::Reassign {
        targets,
        replacement,
      } => {
        let mut next: RelationSet = current.difference(targets).copied().collect();
        next.insert(*replacement);
        next
      }
      Self::Augment { id } => {
        let mut next = current.clone();
        next.insert(*id);
        next
      }
    }
  }

  pub fn diff(&self, current: &RelationSet) -> Change {
    let next = self.next_state(current);
    if next == *current {
      Change::NoOp
    } else {
      Change::Mutate {
        current: current.clone(),
        next,
      }
    }
  }
}

impl Change {
  pub fn is_actionable(&self) -> bool {
    matches!(self, Self::Mutate { .. })
  }

  pub fn added(&self) -> RelationSet {
    match self {
      Self::NoOp => RelationSet::new(),
      Self::Mutate { current, next } => next.difference(current).copied().collect(),
    }
  }

  pub fn removed(&self) -> RelationSet {
    match self {
      Self::NoOp => RelationSet::new(),
      Self::Mutate { current, next } => current.difference(next).copied().collect(),
    }
  }
}
