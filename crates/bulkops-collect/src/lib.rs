//! Bulkops Collect
//!
//! Walks paginated listing endpoints and memoizes small reference sets.
//!
//! - [`Paginator`] drives `fetch(offset) -> Page` until the listing is
//!   exhausted, a visitor asks to stop, or the page guard trips.
//! - [`ListShape`] reads items, the next cursor and the total out of a
//!   listing body.
//! - [`Listing`] binds both to an [`ApiClient`](bulkops_transport::ApiClient).
//! - [`ReferenceCache`] keeps reference sets (bundles, groups, locations)
//!   keyed by their resolved listing URL, de-duplicating concurrent loads.

mod cache;
mod error;
mod listing;
mod page;
mod paginator;
mod reference;

pub use cache::ReferenceCache;
pub use error::CollectError;
pub use listing::Listing;
pub use page::{ListShape, Page};
pub use paginator::{Advance, Paginator, ScanStats};
pub use reference::{ReferenceEntry, ReferenceSet};
