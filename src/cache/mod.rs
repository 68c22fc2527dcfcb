//! Query cache with explicit invalidation.
//!
//! Fetched resource snapshots are kept per [`ResourceKey`]. Entries stay
//! fresh until a mutation invalidates them; there is no timeout and no
//! eviction. Concurrent fetches of one key coalesce into a single remote
//! call, and subscribers are notified when an entry changes.

mod key;
mod store;

pub use key::{KeyPattern, ResourceKey, ResourceTag};
pub use store::{CacheEvent, QueryCache, Subscription};
