//! Draft-document cache with explicit freshness and tenant isolation.
//!
//! This crate holds the pieces of the client cache that do not talk to the
//! network:
//!
//! - [`DraftCacheKey`]: the key registry. Keys cannot be built without a
//!   tenant and a project, and every view variant of a project is enumerable
//!   so writes can be mirrored across variants in one place.
//! - [`CacheStore`]: a reactive key/value store with atomic batch writes,
//!   snapshots for optimistic rollback and change subscription.
//! - [`Freshness`] and [`CacheRead`]: callers state their staleness tolerance
//!   and reads report how old they are.
//! - [`GenerationTracker`]: per-project counters that let stale fetches be
//!   recognized and dropped.
//!
//! # Example
//!
//! ```ignore
//! let store = InMemoryCacheStore::default();
//! let key = DraftCacheKey::list(tenant_id, project_id);
//! store.set(key.clone(), CacheValue::Documents(documents))?;
//!
//! let snapshot = store.snapshot(&[key.clone()])?;
//! store.set(key, CacheValue::Documents(optimistic))?;
//! // server said no
//! store.restore(snapshot)?;
//! ```

pub mod entry;
pub mod freshness;
pub mod generation;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, CacheValue, ComposedContent};
pub use freshness::{CacheRead, Freshness};
pub use generation::{Generation, GenerationTracker};
pub use key::{DraftCacheKey, ProjectPrefix};
pub use store::{
    CacheChange, CacheResult, CacheStats, CacheStore, CacheWrite, ChangeKind, InMemoryCacheStore,
    OptimisticSnapshot,
};
