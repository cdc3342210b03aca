//! The paginated collector.

use std::future::Future;
use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::error::CollectError;
use crate::page::Page;

/// How the next offset is chosen when a page carries no cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
  /// Derive `offset + page_size`, stopping at `total` or an empty page.
  Offsets,
  /// Stop as soon as a page has no cursor.
  CursorOnly,
}

/// Counters from a finished walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
  pub pages: usize,
  /// Records handed to the visitor.
  pub scanned: usize,
  /// The visitor stopped the walk before the listing was exhausted.
  pub stopped_early: bool,
}

/// Walks an offset-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Paginator {
  page_size: u64,
  guard_limit: usize,
  advance: Advance,
}

impl Paginator {
  pub const DEFAULT_GUARD_LIMIT: usize = 500;

  pub fn new(page_size: u64) -> Self {
    Self {
      page_size: page_size.max(1),
      guard_limit: Self::DEFAULT_GUARD_LIMIT,
      advance: Advance::Offsets,
    }
  }

  /// Only follow explicit cursors.
  pub fn cursor_only(mut self) -> Self {
    self.advance = Advance::CursorOnly;
    self
  }

  /// Fail after `guard_limit` page fetches.
  pub fn with_guard_limit(mut self, guard_limit: usize) -> Self {
    self.guard_limit = guard_limit;
    self
  }

  pub fn page_size(&self) -> u64 {
    self.page_size
  }

  /// Fetch every page and return all records in listing order.
  pub async fn collect<T, E, F, Fut>(&self, fetch: F) -> Result<Vec<T>, E>
  where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    E: From<CollectError>,
  {
    let mut records = Vec::new();
    self
      .scan(fetch, |record| {
        records.push(record);
        ControlFlow::Continue(())
      })
      .await?;
    Ok(records)
  }

  /// Hand records to `visit` page by page until it breaks or the listing ends.
  ///
  /// The next offset is the page's cursor when present. Otherwise, in
  /// [`Advance::Offsets`] mode, it is `offset + page_size`, and the walk ends
  /// once that reaches a known total. An empty page always ends the walk.
  pub async fn scan<T, E, F, Fut, V>(&self, mut fetch: F, mut visit: V) -> Result<ScanStats, E>
  where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    E: From<CollectError>,
    V: FnMut(T) -> ControlFlow<()>,
  {
    let mut stats = ScanStats::default();
    let mut offset = 0;

    loop {
      if stats.pages >= self.guard_limit {
        warn!(limit = self.guard_limit, offset, "pagination guard tripped");
        return Err(
          CollectError::PaginationGuardExceeded {
            limit: self.guard_limit,
          }
          .into(),
        );
      }

      let Page {
        items,
        next_cursor,
        total,
      } = fetch(offset).await?;
      stats.pages += 1;

      let count = items.len();
      debug!(offset, count, ?next_cursor, ?total, "page fetched");

      for record in items {
        stats.scanned += 1;
        if visit(record).is_break() {
          stats.stopped_early = true;
          return Ok(stats);
        }
      }

      if count == 0 {
        break;
      }

      match self.next_offset(offset, next_cursor, total) {
        Some(next) => offset = next,
        None => break,
      }
    }

    Ok(stats)
  }

  fn next_offset(&self, offset: u64, next_cursor: Option<u64>, total: Option<u64>) -> Option<u64> {
    if next_cursor.is_some() {
      return next_cursor;
    }

    match self.advance {
      Advance::CursorOnly => None,
      Advance::Offsets => {
        let derived = offset + self.page_size;
        match total {
          Some(total) if derived >= total => None,
          _ => Some(derived),
        }
      }
    }
  }
}
