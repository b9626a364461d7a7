//! Per-project generation counters.
//!
//! Every write a mutation makes to a project's cache advances that project's
//! generation. A fetch records the generation it started under and may only
//! write its result if the generation is still current, which keeps a slow
//! hydrate from clobbering a newer optimistic write.

use dashmap::DashMap;
use patentdraft_core::{ProjectId, TenantId};

use crate::key::ProjectPrefix;

/// A point in a project's write history. Monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_newer_than(&self, other: &Generation) -> bool {
        self.0 > other.0
    }
}

/// Tracks the current generation of every project seen so far.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    generations: DashMap<ProjectPrefix, u64>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation; zero for a project never written.
    pub fn current(&self, tenant_id: TenantId, project_id: ProjectId) -> Generation {
        let prefix = ProjectPrefix::new(tenant_id, project_id);
        Generation(self.generations.get(&prefix).map(|g| *g).unwrap_or(0))
    }

    /// Advance the project's generation and return the new value.
    pub fn advance(&self, tenant_id: TenantId, project_id: ProjectId) -> Generation {
        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let mut entry = self.generations.entry(prefix).or_insert(0);
        *entry += 1;
        Generation(*entry)
    }

    pub fn is_current(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        generation: Generation,
    ) -> bool {
        self.current(tenant_id, project_id) == generation
    }

    /// Run `write` only if `generation` is still current.
    ///
    /// The project's slot stays locked while `write` runs, so no `advance`
    /// can slip in between the check and the write. `write` must not call
    /// back into this tracker.
    pub fn if_current<R>(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        generation: Generation,
        write: impl FnOnce() -> R,
    ) -> Option<R> {
        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let slot = self.generations.entry(prefix).or_insert(0);
        if *slot != generation.0 {
            return None;
        }
        let result = write();
        drop(slot);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_project_starts_at_zero() {
        let tracker = GenerationTracker::new();
        assert_eq!(
            tracker.current(TenantId::now_v7(), ProjectId::now_v7()),
            Generation::default()
        );
    }

    #[test]
    fn test_advance_is_monotonic_and_per_project() {
        let tracker = GenerationTracker::new();
        let tenant = TenantId::now_v7();
        let a = ProjectId::now_v7();
        let b = ProjectId::now_v7();

        let first = tracker.advance(tenant, a);
        let second = tracker.advance(tenant, a);
        assert!(second.is_newer_than(&first));
        assert_eq!(tracker.current(tenant, b).value(), 0);
        assert!(tracker.is_current(tenant, a, second));
        assert!(!tracker.is_current(tenant, a, first));
    }

    #[test]
    fn test_if_current_skips_stale_writes() {
        let tracker = GenerationTracker::new();
        let tenant = TenantId::now_v7();
        let project = ProjectId::now_v7();

        let started = tracker.current(tenant, project);
        assert_eq!(tracker.if_current(tenant, project, started, || 7), Some(7));

        tracker.advance(tenant, project);
        assert_eq!(tracker.if_current(tenant, project, started, || 7), None);
    }
}
