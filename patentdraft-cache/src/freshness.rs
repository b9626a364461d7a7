//! Freshness contracts for draft reads.
//!
//! Callers state how stale a cached view they will accept, and every read
//! comes back wrapped in a [`CacheRead`] that says whether it was served from
//! the cache and how old it is.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::generation::Generation;

/// Freshness requirement for a read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Accept cached data up to the given age. Older entries are refetched.
    BestEffort {
        /// Maximum acceptable staleness for cached data.
        max_staleness: Duration,
    },

    /// Always go to the server.
    #[default]
    Consistent,
}

impl Freshness {
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn consistent() -> Self {
        Self::Consistent
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Get the max staleness for BestEffort, or zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }

    /// Whether an entry cached at `cached_at` satisfies this requirement.
    pub fn accepts(&self, cached_at: DateTime<Utc>) -> bool {
        match self {
            Self::Consistent => false,
            Self::BestEffort { max_staleness } => age_of(cached_at) <= *max_staleness,
        }
    }
}

/// Result of a read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: DateTime<Utc>,
    /// Project generation the value was read or written under.
    generation: Option<Generation>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, cached_at: DateTime<Utc>, generation: Option<Generation>) -> Self {
        Self {
            value,
            cached_at,
            generation,
            was_cache_hit: true,
        }
    }

    /// A value that was just fetched from the server.
    pub fn from_remote(value: T, generation: Option<Generation>) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            generation,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// How long ago the value was cached.
    pub fn staleness(&self) -> Duration {
        age_of(self.cached_at)
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            generation: self.generation,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

fn age_of(cached_at: DateTime<Utc>) -> Duration {
    Utc::now()
        .signed_duration_since(cached_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
