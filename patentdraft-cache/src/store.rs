//! Cache store trait and the in-memory implementation.
//!
//! The store is a plain key/value map with change notification. It knows
//! nothing about drafts; the reconciler decides which keys move together and
//! uses [`CacheStore::apply`] to make those writes visible as one step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use patentdraft_core::CacheError;
use tokio::sync::broadcast;
use tracing::debug;

use crate::entry::{CacheEntry, CacheValue};
use crate::key::{DraftCacheKey, ProjectPrefix};

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// One write in an atomic batch.
#[derive(Debug, Clone)]
pub enum CacheWrite {
    /// Store a value, stamping it as freshly cached.
    Set(DraftCacheKey, CacheValue),
    /// Store an entry as given, keeping its `cached_at` and flag. Used for
    /// local rewrites that must not look like fresh server data.
    Put(DraftCacheKey, CacheEntry),
    /// Flag an existing entry as needing a refresh. No-op for absent keys.
    Invalidate(DraftCacheKey),
    Remove(DraftCacheKey),
}

impl CacheWrite {
    pub fn key(&self) -> &DraftCacheKey {
        match self {
            Self::Set(key, _) | Self::Put(key, _) | Self::Invalidate(key) | Self::Remove(key) => {
                key
            }
        }
    }
}

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Invalidated,
    Removed,
}

/// Notification sent to subscribers after a key changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub key: DraftCacheKey,
    pub kind: ChangeKind,
}

/// Previous values of every key a mutation may touch.
///
/// Captured before the first optimistic write and restored verbatim if the
/// server rejects the mutation. `None` records that the key was absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticSnapshot {
    entries: Vec<(DraftCacheKey, Option<CacheEntry>)>,
}

impl OptimisticSnapshot {
    pub fn get(&self, key: &DraftCacheKey) -> Option<&Option<CacheEntry>> {
        self.entries
            .iter()
            .find(|(captured, _)| captured == key)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Reactive key/value store backing the draft views.
///
/// Implementations must make every method atomic with respect to the others:
/// a reader never observes half of an [`apply`](CacheStore::apply) batch.
pub trait CacheStore: Send + Sync {
    /// Read one entry. Counts as a hit when the entry is present and valid.
    fn get(&self, key: &DraftCacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Read several entries under one lock.
    fn get_many(&self, keys: &[DraftCacheKey]) -> CacheResult<Vec<Option<CacheEntry>>>;

    /// Apply a batch of writes atomically and notify subscribers.
    fn apply(&self, writes: Vec<CacheWrite>) -> CacheResult<()>;

    /// Replace a value through an updater. Returning `None` leaves the key
    /// unchanged.
    fn update<F>(&self, key: &DraftCacheKey, f: F) -> CacheResult<bool>
    where
        F: FnOnce(Option<&CacheValue>) -> Option<CacheValue>;

    /// Invalidate every key of a project, returning how many entries were
    /// flagged.
    fn invalidate_matching(&self, prefix: &ProjectPrefix) -> CacheResult<u64>;

    /// Capture the current entries of `keys`.
    fn snapshot(&self, keys: &[DraftCacheKey]) -> CacheResult<OptimisticSnapshot>;

    /// Put every captured entry back exactly as it was.
    fn restore(&self, snapshot: OptimisticSnapshot) -> CacheResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<CacheChange>;

    fn stats(&self) -> CacheResult<CacheStats>;

    fn set(&self, key: DraftCacheKey, value: CacheValue) -> CacheResult<()> {
        self.apply(vec![CacheWrite::Set(key, value)])
    }

    fn set_many(&self, entries: Vec<(DraftCacheKey, CacheValue)>) -> CacheResult<()> {
        self.apply(
            entries
                .into_iter()
                .map(|(key, value)| CacheWrite::Set(key, value))
                .collect(),
        )
    }

    fn invalidate(&self, key: &DraftCacheKey) -> CacheResult<()> {
        self.apply(vec![CacheWrite::Invalidate(key.clone())])
    }

    fn remove(&self, key: &DraftCacheKey) -> CacheResult<()> {
        self.apply(vec![CacheWrite::Remove(key.clone())])
    }
}

/// In-memory cache store shared by every consumer of a process.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<DraftCacheKey, CacheEntry>>,
    changes: broadcast::Sender<CacheChange>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InMemoryCacheStore {
    /// Create a store whose change channel buffers `capacity` notifications
    /// per subscriber before lagging.
    pub fn new(capacity: usize) -> Self {
        let (changes, _rx) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn notify(&self, changed: Vec<CacheChange>) {
        for change in changed {
            // No subscribers is fine.
            let _ = self.changes.send(change);
        }
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &DraftCacheKey) -> CacheResult<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let entry = entries.get(key).cloned();
        match &entry {
            Some(e) if e.is_valid() => self.hits.fetch_add(1, Ordering::Relaxed),
            _ => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(entry)
    }

    fn get_many(&self, keys: &[DraftCacheKey]) -> CacheResult<Vec<Option<CacheEntry>>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    fn apply(&self, writes: Vec<CacheWrite>) -> CacheResult<()> {
        let mut changed = Vec::with_capacity(writes.len());
        {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            let now = Utc::now();
            for write in writes {
                match write {
                    CacheWrite::Set(key, value) => {
                        entries.insert(
                            key.clone(),
                            CacheEntry {
                                value,
                                cached_at: now,
                                invalidated: false,
                            },
                        );
                        changed.push(CacheChange {
                            key,
                            kind: ChangeKind::Set,
                        });
                    }
                    CacheWrite::Put(key, entry) => {
                        entries.insert(key.clone(), entry);
                        changed.push(CacheChange {
                            key,
                            kind: ChangeKind::Set,
                        });
                    }
                    CacheWrite::Invalidate(key) => {
                        if let Some(entry) = entries.get_mut(&key) {
                            entry.invalidated = true;
                            self.invalidations.fetch_add(1, Ordering::Relaxed);
                            changed.push(CacheChange {
                                key,
                                kind: ChangeKind::Invalidated,
                            });
                        }
                    }
                    CacheWrite::Remove(key) => {
                        if entries.remove(&key).is_some() {
                            changed.push(CacheChange {
                                key,
                                kind: ChangeKind::Removed,
                            });
                        }
                    }
                }
            }
        }
        debug!(changes = changed.len(), "Applied cache writes");
        self.notify(changed);
        Ok(())
    }

    fn update<F>(&self, key: &DraftCacheKey, f: F) -> CacheResult<bool>
    where
        F: FnOnce(Option<&CacheValue>) -> Option<CacheValue>,
    {
        let updated = {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            match f(entries.get(key).map(|entry| &entry.value)) {
                Some(value) => {
                    entries.insert(key.clone(), CacheEntry::new(value));
                    true
                }
                None => false,
            }
        };
        if updated {
            self.notify(vec![CacheChange {
                key: key.clone(),
                kind: ChangeKind::Set,
            }]);
        }
        Ok(updated)
    }

    fn invalidate_matching(&self, prefix: &ProjectPrefix) -> CacheResult<u64> {
        let mut changed = Vec::new();
        {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            for (key, entry) in entries.iter_mut().filter(|(key, _)| prefix.matches(key)) {
                entry.invalidated = true;
                changed.push(CacheChange {
                    key: key.clone(),
                    kind: ChangeKind::Invalidated,
                });
            }
        }
        let count = changed.len() as u64;
        self.invalidations.fetch_add(count, Ordering::Relaxed);
        self.notify(changed);
        Ok(count)
    }

    fn snapshot(&self, keys: &[DraftCacheKey]) -> CacheResult<OptimisticSnapshot> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(OptimisticSnapshot {
            entries: keys
                .iter()
                .map(|key| (key.clone(), entries.get(key).cloned()))
                .collect(),
        })
    }

    fn restore(&self, snapshot: OptimisticSnapshot) -> CacheResult<()> {
        let mut changed = Vec::with_capacity(snapshot.len());
        {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            for (key, previous) in snapshot.entries {
                match previous {
                    Some(entry) => {
                        entries.insert(key.clone(), entry);
                        changed.push(CacheChange {
                            key,
                            kind: ChangeKind::Set,
                        });
                    }
                    None => {
                        if entries.remove(&key).is_some() {
                            changed.push(CacheChange {
                                key,
                                kind: ChangeKind::Removed,
                            });
                        }
                    }
                }
            }
        }
        self.notify(changed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    fn stats(&self) -> CacheResult<CacheStats> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            invalidations: self.invalidations.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patentdraft_core::{DraftDocument, ProjectId, SectionType, TenantId};

    fn keys() -> (TenantId, ProjectId) {
        (TenantId::now_v7(), ProjectId::now_v7())
    }

    #[test]
    fn test_set_get_and_stats() {
        let store = InMemoryCacheStore::default();
        let (tenant, project) = keys();
        let key = DraftCacheKey::exists(tenant, project);

        assert!(store.get(&key).unwrap().is_none());
        store.set(key.clone(), CacheValue::Exists(true)).unwrap();
        let entry = store.get(&key).unwrap().unwrap();
        assert_eq!(entry.value, CacheValue::Exists(true));

        let stats = store.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_invalidate_keeps_value_and_ignores_absent_keys() {
        let store = InMemoryCacheStore::default();
        let (tenant, project) = keys();
        let key = DraftCacheKey::list(tenant, project);

        store.invalidate(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());

        store.set(key.clone(), CacheValue::Documents(Vec::new())).unwrap();
        store.invalidate(&key).unwrap();
        let entry = store.get(&key).unwrap().unwrap();
        assert!(entry.invalidated);
        assert_eq!(entry.value, CacheValue::Documents(Vec::new()));
    }

    #[test]
    fn test_invalidate_matching_is_project_scoped() {
        let store = InMemoryCacheStore::default();
        let (tenant, project) = keys();
        let other = ProjectId::now_v7();

        store
            .set_many(vec![
                (DraftCacheKey::list(tenant, project), CacheValue::Documents(Vec::new())),
                (DraftCacheKey::exists(tenant, project), CacheValue::Exists(false)),
                (DraftCacheKey::list(tenant, other), CacheValue::Documents(Vec::new())),
            ])
            .unwrap();

        let count = store
            .invalidate_matching(&ProjectPrefix::new(tenant, project))
            .unwrap();
        assert_eq!(count, 2);
        assert!(store
            .get(&DraftCacheKey::list(tenant, other))
            .unwrap()
            .unwrap()
            .is_valid());
    }

    #[test]
    fn test_snapshot_restore_is_exact() {
        let store = InMemoryCacheStore::default();
        let (tenant, project) = keys();
        let list = DraftCacheKey::list(tenant, project);
        let by_type = DraftCacheKey::by_type(tenant, project, SectionType::Claims);

        store
            .set(
                list.clone(),
                CacheValue::Documents(vec![DraftDocument::pending(
                    project,
                    SectionType::Claims,
                    "A claim.",
                )]),
            )
            .unwrap();
        store.invalidate(&list).unwrap();
        let before = store.get_many(&[list.clone(), by_type.clone()]).unwrap();

        let snapshot = store.snapshot(&[list.clone(), by_type.clone()]).unwrap();
        store
            .apply(vec![
                CacheWrite::Set(list.clone(), CacheValue::Documents(Vec::new())),
                CacheWrite::Set(by_type.clone(), CacheValue::Document(None)),
            ])
            .unwrap();
        store.restore(snapshot).unwrap();

        assert_eq!(store.get_many(&[list, by_type]).unwrap(), before);
    }

    #[test]
    fn test_put_keeps_age_and_flag() {
        let store = InMemoryCacheStore::default();
        let (tenant, project) = keys();
        let key = DraftCacheKey::list(tenant, project);
        let fetched_at = Utc::now() - chrono::Duration::minutes(5);

        store
            .apply(vec![CacheWrite::Put(
                key.clone(),
                CacheEntry {
                    value: CacheValue::Documents(Vec::new()),
                    cached_at: fetched_at,
                    invalidated: true,
                },
            )])
            .unwrap();

        let entry = store.get(&key).unwrap().unwrap();
        assert_eq!(entry.cached_at, fetched_at);
        assert!(entry.invalidated);

        store.set(key.clone(), CacheValue::Documents(Vec::new())).unwrap();
        assert!(store.get(&key).unwrap().unwrap().cached_at > fetched_at);
    }

    #[test]
    fn test_update_with_updater() {
        let store = InMemoryCacheStore::default();
        let (tenant, project) = keys();
        let key = DraftCacheKey::exists(tenant, project);

        let skipped = store.update(&key, |old| old.map(|_| CacheValue::Exists(true))).unwrap();
        assert!(!skipped);
        assert!(store.get(&key).unwrap().is_none());

        store.set(key.clone(), CacheValue::Exists(false)).unwrap();
        let flipped = store
            .update(&key, |old| {
                old.and_then(CacheValue::as_exists)
                    .map(|flag| CacheValue::Exists(!flag))
            })
            .unwrap();
        assert!(flipped);
        assert_eq!(store.get(&key).unwrap().unwrap().value, CacheValue::Exists(true));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = InMemoryCacheStore::default();
        let mut rx = store.subscribe();
        let (tenant, project) = keys();
        let key = DraftCacheKey::with_content(tenant, project);

        store.set(key.clone(), CacheValue::Exists(true)).unwrap();
        store.invalidate(&key).unwrap();
        store.remove(&key).unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Set);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Invalidated);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.kind, ChangeKind::Removed);
        assert_eq!(last.key, key);
    }
}
