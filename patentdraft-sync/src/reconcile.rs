//! Reconciliation of a project's cached draft views with the backend.
//!
//! `DraftReconciler` is the only writer of the cache store. It keeps the
//! list, composed-content, by-type and existence views of each project
//! consistent with one another and with the server:
//!
//! - Mutations for one `(tenant, project)` run one at a time through an
//!   async queue. Different projects never wait on each other.
//! - Every mutation advances the project's generation before its first
//!   optimistic write. A hydrate only writes its result if the generation it
//!   started under is still current and no mutation is pending.
//! - Before writing optimistically a mutation snapshots every key it may
//!   touch. A rejected mutation restores that snapshot exactly.
//! - A version restore writes the server's composed content over every
//!   content variant after the resync, then broadcasts an override.

use crate::config::CacheSettings;
use crate::events::{ContentOverride, EventBroadcaster};
use crate::gateway::DraftGateway;
use chrono::Utc;
use dashmap::DashMap;
use patentdraft_cache::{
    CacheChange, CacheEntry, CacheRead, CacheResult, CacheStore, CacheValue, CacheWrite,
    ComposedContent, DraftCacheKey, Freshness, Generation, GenerationTracker, OptimisticSnapshot,
    ProjectPrefix,
};
use patentdraft_core::{
    upsert_document, CacheError, ComposeError, DraftDocument, DraftError, DraftResult, ProjectId,
    SectionType, SectionUpdate, TenantId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Tunables of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Staleness tolerated by [`DraftReconciler::content_freshness`].
    pub content_max_staleness: Duration,
    /// Staleness tolerated for the existence check.
    pub exists_max_staleness: Duration,
    pub event_capacity: usize,
    /// Pause between writing a restore override and broadcasting it.
    pub override_broadcast_delay: Duration,
}

impl From<&CacheSettings> for ReconcilerOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            content_max_staleness: settings.content_max_staleness(),
            exists_max_staleness: settings.exists_max_staleness(),
            event_capacity: settings.event_capacity,
            override_broadcast_delay: settings.override_broadcast_delay(),
        }
    }
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

/// Synchronization phase of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing has been loaded from the server yet.
    Empty,
    Hydrating,
    Synced,
    /// At least one mutation is queued or awaiting the server.
    Optimistic,
}

/// What a UI should render for one query.
#[derive(Debug, Clone)]
pub enum QueryState<T> {
    /// Nothing cached and nothing in flight.
    Idle,
    Loading,
    Ready { value: T, invalidated: bool },
    Failed(DraftError),
}

impl<T> QueryState<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// The document list and composed content of a project, read together.
#[derive(Debug, Clone)]
pub struct ProjectView {
    pub phase: SyncPhase,
    pub documents: QueryState<Vec<DraftDocument>>,
    pub content: QueryState<ComposedContent>,
}

/// Result of [`DraftReconciler::restore_version`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub content: String,
    pub version_name: String,
    pub document_count: u32,
    /// False when the post-restore list fetch failed and the list views were
    /// only invalidated.
    pub resynced: bool,
}

#[derive(Debug, Default)]
struct ProjectState {
    hydrating: u32,
    pending_mutations: u32,
    synced: bool,
    last_error: Option<DraftError>,
}

impl ProjectState {
    fn hydrating_count(&mut self) -> &mut u32 {
        &mut self.hydrating
    }

    fn pending_count(&mut self) -> &mut u32 {
        &mut self.pending_mutations
    }

    fn phase(&self) -> SyncPhase {
        if self.pending_mutations > 0 {
            SyncPhase::Optimistic
        } else if self.hydrating > 0 {
            SyncPhase::Hydrating
        } else if self.synced {
            SyncPhase::Synced
        } else {
            SyncPhase::Empty
        }
    }
}

/// One unit of a project's hydrate or mutation count, released on drop so a
/// cancelled call never leaves the project stuck in that phase.
struct InFlight<'a> {
    states: &'a DashMap<ProjectPrefix, ProjectState>,
    prefix: ProjectPrefix,
    count: fn(&mut ProjectState) -> &mut u32,
}

impl<'a> InFlight<'a> {
    fn begin(
        states: &'a DashMap<ProjectPrefix, ProjectState>,
        prefix: ProjectPrefix,
        count: fn(&mut ProjectState) -> &mut u32,
    ) -> Self {
        *count(&mut *states.entry(prefix).or_default()) += 1;
        Self {
            states,
            prefix,
            count,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.states.get_mut(&self.prefix) {
            let count = (self.count)(&mut *state);
            *count = count.saturating_sub(1);
        }
    }
}

/// A mutation's turn in its project's queue.
///
/// The queue itself is dropped once nothing holds or waits on it.
struct MutationTurn<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    queues: &'a DashMap<ProjectPrefix, Arc<Mutex<()>>>,
    prefix: ProjectPrefix,
}

impl Drop for MutationTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.queues
            .remove_if(&self.prefix, |_, queue| Arc::strong_count(queue) == 1);
    }
}

/// Keeps cached draft views consistent with the backend.
pub struct DraftReconciler<G, S> {
    gateway: G,
    store: S,
    generations: GenerationTracker,
    /// Phase bookkeeping of every project seen, kept for the reconciler's
    /// lifetime. One reconciler serves one editing session.
    states: DashMap<ProjectPrefix, ProjectState>,
    /// Mutation queues of projects with a mutation running or waiting.
    queues: DashMap<ProjectPrefix, Arc<Mutex<()>>>,
    events: EventBroadcaster,
    options: ReconcilerOptions,
}

impl<G: DraftGateway, S: CacheStore> DraftReconciler<G, S> {
    pub fn new(gateway: G, store: S, options: ReconcilerOptions) -> Self {
        let events = EventBroadcaster::new(options.event_capacity);
        Self {
            gateway,
            store,
            generations: GenerationTracker::new(),
            states: DashMap::new(),
            queues: DashMap::new(),
            events,
            options,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The backing store, for inspection. Writes must go through the
    /// reconciler.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Freshness used for list and content reads by default.
    pub fn content_freshness(&self) -> Freshness {
        Freshness::best_effort(self.options.content_max_staleness)
    }

    pub fn phase(&self, tenant_id: TenantId, project_id: ProjectId) -> SyncPhase {
        self.states
            .get(&ProjectPrefix::new(tenant_id, project_id))
            .map_or(SyncPhase::Empty, |state| state.phase())
    }

    /// Error of the last failed hydrate, cleared by the next server write.
    pub fn last_error(&self, tenant_id: TenantId, project_id: ProjectId) -> Option<DraftError> {
        self.states
            .get(&ProjectPrefix::new(tenant_id, project_id))
            .and_then(|state| state.last_error.clone())
    }

    pub fn generation(&self, tenant_id: TenantId, project_id: ProjectId) -> Generation {
        self.generations.current(tenant_id, project_id)
    }

    /// Cache change notifications, for re-rendering.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.store.subscribe()
    }

    pub fn subscribe_overrides(&self) -> broadcast::Receiver<ContentOverride> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The project's document list.
    pub async fn documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
        freshness: Freshness,
    ) -> DraftResult<CacheRead<Vec<DraftDocument>>> {
        let key = DraftCacheKey::list_for(tenant_id, project_id, skip_init);
        if let Some(entry) = self.store.get(&key)? {
            if entry.is_valid() && freshness.accepts(entry.cached_at) {
                let documents = documents_of(&key, &entry)?.to_vec();
                return Ok(CacheRead::from_cache(
                    documents,
                    entry.cached_at,
                    Some(self.generation(tenant_id, project_id)),
                ));
            }
        }

        let hydrated = self.hydrate(tenant_id, project_id, skip_init).await?;
        Ok(hydrated.map(|composed| composed.documents))
    }

    /// The project's composed content.
    ///
    /// An invalidated content entry is rebuilt from the list entry when the
    /// list is still valid, without a fetch.
    pub async fn content(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
        freshness: Freshness,
    ) -> DraftResult<CacheRead<ComposedContent>> {
        let content_key = DraftCacheKey::content_for(tenant_id, project_id, skip_init);
        let list_key = DraftCacheKey::list_for(tenant_id, project_id, skip_init);
        let generation = self.generation(tenant_id, project_id);

        let mut entries = self
            .store
            .get_many(&[content_key.clone(), list_key.clone()])?
            .into_iter();
        let content_entry = entries.next().flatten();
        let list_entry = entries.next().flatten();

        if let Some(entry) = &content_entry {
            if entry.is_valid() && freshness.accepts(entry.cached_at) {
                let composed = composed_of(&content_key, entry)?.clone();
                return Ok(CacheRead::from_cache(
                    composed,
                    entry.cached_at,
                    Some(generation),
                ));
            }
        }

        if let Some(list) = &list_entry {
            if list.is_valid() && freshness.accepts(list.cached_at) {
                let composed = ComposedContent::rebuild(documents_of(&list_key, list)?.to_vec());
                let write = derived(content_key.clone(), list, CacheValue::Composed(composed.clone()));
                let written = self.generations.if_current(tenant_id, project_id, generation, || {
                    self.store.apply(vec![write])
                });
                match written {
                    Some(result) => {
                        result?;
                        debug!(key = %content_key, "Recomposed content from cached list");
                    }
                    None => debug!(key = %content_key, "Project moved on, recompose not cached"),
                }
                return Ok(CacheRead::from_cache(
                    composed,
                    list.cached_at,
                    Some(generation),
                ));
            }
        }

        self.hydrate(tenant_id, project_id, skip_init).await
    }

    /// One section of the project, if it exists.
    pub async fn section(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        section: SectionType,
        freshness: Freshness,
    ) -> DraftResult<CacheRead<Option<DraftDocument>>> {
        let key = DraftCacheKey::by_type(tenant_id, project_id, section);
        if let Some(entry) = self.store.get(&key)? {
            if entry.is_valid() && freshness.accepts(entry.cached_at) {
                let document = document_of(&key, &entry)?.cloned();
                return Ok(CacheRead::from_cache(
                    document,
                    entry.cached_at,
                    Some(self.generation(tenant_id, project_id)),
                ));
            }
        }

        let documents = self
            .documents(tenant_id, project_id, false, freshness)
            .await?;
        Ok(documents.map(|documents| latest_of(&documents, section).cloned()))
    }

    /// Whether the project has any drafts. Cached longer than content.
    pub async fn has_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> DraftResult<CacheRead<bool>> {
        let key = DraftCacheKey::exists(tenant_id, project_id);
        let freshness = Freshness::best_effort(self.options.exists_max_staleness);
        if let Some(entry) = self.store.get(&key)? {
            if entry.is_valid() && freshness.accepts(entry.cached_at) {
                return Ok(CacheRead::from_cache(
                    exists_of(&key, &entry)?,
                    entry.cached_at,
                    Some(self.generation(tenant_id, project_id)),
                ));
            }
        }

        let generation = self.generation(tenant_id, project_id);
        let exists = self.gateway.has_documents(tenant_id, project_id).await?;
        let written = self.generations.if_current(tenant_id, project_id, generation, || {
            self.store.set(key.clone(), CacheValue::Exists(exists))
        });
        match written {
            Some(result) => {
                result?;
                Ok(CacheRead::from_remote(exists, Some(generation)))
            }
            None => {
                // A mutation settled the flag while the check was in flight.
                let current = self.store.get(&key)?;
                match current {
                    Some(entry) => Ok(CacheRead::from_cache(
                        exists_of(&key, &entry)?,
                        entry.cached_at,
                        Some(self.generation(tenant_id, project_id)),
                    )),
                    None => Ok(CacheRead::from_remote(exists, Some(generation))),
                }
            }
        }
    }

    /// List and content views of a project as one consistent read.
    pub fn read_view(&self, tenant_id: TenantId, project_id: ProjectId) -> DraftResult<ProjectView> {
        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let (phase, hydrating, last_error) = self
            .states
            .get(&prefix)
            .map(|state| (state.phase(), state.hydrating > 0, state.last_error.clone()))
            .unwrap_or((SyncPhase::Empty, false, None));

        if hydrating {
            return Ok(ProjectView {
                phase,
                documents: QueryState::Loading,
                content: QueryState::Loading,
            });
        }
        if let Some(err) = last_error {
            return Ok(ProjectView {
                phase,
                documents: QueryState::Failed(err.clone()),
                content: QueryState::Failed(err),
            });
        }

        let list_key = DraftCacheKey::list(tenant_id, project_id);
        let content_key = DraftCacheKey::with_content(tenant_id, project_id);
        let mut entries = self
            .store
            .get_many(&[list_key.clone(), content_key.clone()])?
            .into_iter();

        let documents = match entries.next().flatten() {
            Some(entry) => QueryState::Ready {
                value: documents_of(&list_key, &entry)?.to_vec(),
                invalidated: entry.invalidated,
            },
            None => QueryState::Idle,
        };
        let content = match entries.next().flatten() {
            Some(entry) => QueryState::Ready {
                value: composed_of(&content_key, &entry)?.clone(),
                invalidated: entry.invalidated,
            },
            None => QueryState::Idle,
        };

        Ok(ProjectView {
            phase,
            documents,
            content,
        })
    }

    /// Flag every cached view of the project for refresh.
    pub fn invalidate_project(&self, tenant_id: TenantId, project_id: ProjectId) -> DraftResult<u64> {
        let count = self
            .store
            .invalidate_matching(&ProjectPrefix::new(tenant_id, project_id))?;
        debug!(project_id = %project_id, count = count, "Invalidated project views");
        Ok(count)
    }

    async fn hydrate(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
    ) -> DraftResult<CacheRead<ComposedContent>> {
        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let generation = self.generation(tenant_id, project_id);
        let hydrating = InFlight::begin(&self.states, prefix, ProjectState::hydrating_count);
        debug!(
            project_id = %project_id,
            generation = generation.value(),
            skip_init = skip_init,
            "Hydrating drafts"
        );

        let fetched = self
            .gateway
            .list_documents(tenant_id, project_id, skip_init)
            .await;
        drop(hydrating);

        let documents = match fetched {
            Ok(documents) => documents,
            Err(err) => {
                let err = DraftError::from(err);
                warn!(project_id = %project_id, error = %err, "Hydrate failed");
                self.states.entry(prefix).or_default().last_error = Some(err.clone());
                return Err(err);
            }
        };

        let writes = server_writes(tenant_id, project_id, &documents);
        let written = self.generations.if_current(tenant_id, project_id, generation, || {
            if self.pending_mutations(prefix) > 0 {
                return Ok(false);
            }
            self.store.apply(writes).map(|()| true)
        });

        match written {
            Some(Ok(true)) => {
                self.mark_synced(prefix);
                info!(
                    project_id = %project_id,
                    documents = documents.len(),
                    "Hydrated drafts"
                );
                Ok(CacheRead::from_remote(
                    ComposedContent::rebuild(documents),
                    Some(generation),
                ))
            }
            Some(Err(err)) => Err(err.into()),
            Some(Ok(false)) | None => {
                warn!(
                    project_id = %project_id,
                    generation = generation.value(),
                    "Discarding stale hydrate"
                );
                match self.local_view(tenant_id, project_id, skip_init)? {
                    Some(view) => Ok(view),
                    None => Ok(CacheRead::from_remote(
                        ComposedContent::rebuild(documents),
                        Some(generation),
                    )),
                }
            }
        }
    }

    /// What the cache currently shows for a project, without fetching.
    fn local_view(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
    ) -> CacheResult<Option<CacheRead<ComposedContent>>> {
        let content_key = DraftCacheKey::content_for(tenant_id, project_id, skip_init);
        let list_key = DraftCacheKey::list_for(tenant_id, project_id, skip_init);
        let generation = Some(self.generation(tenant_id, project_id));
        let mut entries = self
            .store
            .get_many(&[content_key.clone(), list_key.clone()])?
            .into_iter();

        match (entries.next().flatten(), entries.next().flatten()) {
            (Some(content), _) if content.is_valid() => Ok(Some(CacheRead::from_cache(
                composed_of(&content_key, &content)?.clone(),
                content.cached_at,
                generation,
            ))),
            (_, Some(list)) => Ok(Some(CacheRead::from_cache(
                ComposedContent::rebuild(documents_of(&list_key, &list)?.to_vec()),
                list.cached_at,
                generation,
            ))),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create or replace one section.
    ///
    /// The list and by-type views show the edit immediately and the content
    /// views are invalidated. A rejected update restores every touched key.
    pub async fn update_section(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        update: SectionUpdate,
    ) -> DraftResult<DraftDocument> {
        if update.section_type.is_reserved() {
            return Err(ComposeError::ReservedSection(update.section_type).into());
        }

        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let _pending = self.begin_mutation(prefix);
        let _turn = self.take_turn(prefix).await;

        let generation = self.generations.advance(tenant_id, project_id);
        let keys = mutation_keys(tenant_id, project_id, [update.section_type]);
        let snapshot = self.store.snapshot(&keys)?;
        let writes = optimistic_writes(
            &snapshot,
            tenant_id,
            project_id,
            std::slice::from_ref(&update),
            false,
        )?;
        self.store.apply(writes)?;
        debug!(
            project_id = %project_id,
            section = %update.section_type,
            generation = generation.value(),
            "Applied optimistic section update"
        );

        match self
            .gateway
            .update_document(tenant_id, project_id, &update)
            .await
        {
            Ok(saved) => {
                let writes =
                    self.confirmed_writes(tenant_id, project_id, std::slice::from_ref(&saved), false)?;
                self.store.apply(writes)?;
                self.mark_synced(prefix);
                info!(
                    project_id = %project_id,
                    section = %saved.section_type,
                    "Section update confirmed"
                );
                Ok(saved)
            }
            Err(err) => {
                self.rollback(project_id, snapshot, &err)?;
                Err(err.into())
            }
        }
    }

    /// Create or replace several sections at once.
    ///
    /// List, content and by-type views change together in one write, with
    /// the content recomposed from the merged list. On success the project
    /// is refetched so every view carries server data.
    pub async fn batch_update(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        updates: Vec<SectionUpdate>,
    ) -> DraftResult<Vec<DraftDocument>> {
        if updates.is_empty() {
            return Err(DraftError::EmptyBatch);
        }
        if let Some(reserved) = updates.iter().find(|u| u.section_type.is_reserved()) {
            return Err(ComposeError::ReservedSection(reserved.section_type).into());
        }

        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let _pending = self.begin_mutation(prefix);
        let _turn = self.take_turn(prefix).await;

        let generation = self.generations.advance(tenant_id, project_id);
        let keys = mutation_keys(
            tenant_id,
            project_id,
            updates.iter().map(|update| update.section_type),
        );
        let snapshot = self.store.snapshot(&keys)?;
        let writes = optimistic_writes(&snapshot, tenant_id, project_id, &updates, true)?;
        self.store.apply(writes)?;
        debug!(
            project_id = %project_id,
            updates = updates.len(),
            generation = generation.value(),
            "Applied optimistic batch update"
        );

        let saved = match self
            .gateway
            .batch_update(tenant_id, project_id, &updates)
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                self.rollback(project_id, snapshot, &err)?;
                return Err(err.into());
            }
        };

        let mut writes = match self.gateway.list_documents(tenant_id, project_id, false).await {
            Ok(documents) => server_writes(tenant_id, project_id, &documents),
            Err(err) => {
                warn!(
                    project_id = %project_id,
                    error = %err,
                    "Resync after batch update failed, keeping confirmed documents"
                );
                self.confirmed_writes(tenant_id, project_id, &saved, true)?
            }
        };
        writes.push(CacheWrite::Set(
            DraftCacheKey::exists(tenant_id, project_id),
            CacheValue::Exists(true),
        ));
        self.store.apply(writes)?;
        self.mark_synced(prefix);
        info!(
            project_id = %project_id,
            documents = saved.len(),
            "Batch update confirmed"
        );
        Ok(saved)
    }

    /// Restore a saved version and make its composed content authoritative.
    ///
    /// After the list is refetched, the server's content string is written
    /// over every content variant, so a resync that read lagging section
    /// data can never win. Editors are notified after a short delay.
    pub async fn restore_version(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        version_id: &str,
    ) -> DraftResult<RestoreOutcome> {
        let prefix = ProjectPrefix::new(tenant_id, project_id);
        let _pending = self.begin_mutation(prefix);
        let _turn = self.take_turn(prefix).await;

        self.generations.advance(tenant_id, project_id);
        let restored = self
            .gateway
            .restore_version(tenant_id, project_id, version_id)
            .await?;

        let mut writes = Vec::new();
        let (documents, resynced) =
            match self.gateway.list_documents(tenant_id, project_id, false).await {
                Ok(documents) => {
                    writes.extend(server_writes(tenant_id, project_id, &documents));
                    (documents, true)
                }
                Err(err) => {
                    warn!(
                        project_id = %project_id,
                        error = %err,
                        "Resync after restore failed, invalidating lists"
                    );
                    writes.extend(
                        DraftCacheKey::list_variants(tenant_id, project_id)
                            .into_iter()
                            .map(CacheWrite::Invalidate),
                    );
                    (self.cached_documents(tenant_id, project_id)?, false)
                }
            };

        for key in DraftCacheKey::content_variants(tenant_id, project_id) {
            writes.push(CacheWrite::Set(
                key,
                CacheValue::Composed(ComposedContent::with_content(
                    documents.clone(),
                    restored.content.clone(),
                )),
            ));
        }
        writes.push(CacheWrite::Set(
            DraftCacheKey::exists(tenant_id, project_id),
            CacheValue::Exists(restored.document_count > 0),
        ));
        self.store.apply(writes)?;
        if resynced {
            self.mark_synced(prefix);
        }
        info!(
            project_id = %project_id,
            version_name = %restored.version_name,
            resynced = resynced,
            "Restored draft version"
        );

        self.events.broadcast_after(
            self.options.override_broadcast_delay,
            ContentOverride::version_restore(
                project_id,
                restored.content.clone(),
                restored.version_name.clone(),
            ),
        );

        Ok(RestoreOutcome {
            content: restored.content,
            version_name: restored.version_name,
            document_count: restored.document_count,
            resynced,
        })
    }

    fn rollback(
        &self,
        project_id: ProjectId,
        snapshot: OptimisticSnapshot,
        cause: &patentdraft_core::GatewayError,
    ) -> CacheResult<()> {
        let keys = snapshot.len();
        self.store.restore(snapshot)?;
        warn!(
            project_id = %project_id,
            keys = keys,
            error = %cause,
            "Server rejected mutation, rolled back optimistic writes"
        );
        Ok(())
    }

    /// Writes that fold server-confirmed documents into the cached lists.
    fn confirmed_writes(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        saved: &[DraftDocument],
        recompose: bool,
    ) -> CacheResult<Vec<CacheWrite>> {
        let list_keys = DraftCacheKey::list_variants(tenant_id, project_id);
        let current = self.store.get_many(&list_keys)?;
        let mut writes = Vec::new();

        for (skip_init, (key, entry)) in [false, true].into_iter().zip(list_keys.iter().zip(current)) {
            let content_key = DraftCacheKey::content_for(tenant_id, project_id, skip_init);
            match entry {
                Some(entry) => {
                    let mut documents = documents_of(key, &entry)?.to_vec();
                    for document in saved {
                        upsert_document(&mut documents, document.clone());
                    }
                    if recompose {
                        writes.push(derived(
                            content_key,
                            &entry,
                            CacheValue::Composed(ComposedContent::rebuild(documents.clone())),
                        ));
                    } else {
                        writes.push(CacheWrite::Invalidate(content_key));
                    }
                    writes.push(derived(key.clone(), &entry, CacheValue::Documents(documents)));
                }
                None => writes.push(CacheWrite::Invalidate(content_key)),
            }
        }
        for document in saved {
            writes.push(CacheWrite::Set(
                DraftCacheKey::by_type(tenant_id, project_id, document.section_type),
                CacheValue::Document(Some(document.clone())),
            ));
        }
        writes.push(CacheWrite::Set(
            DraftCacheKey::exists(tenant_id, project_id),
            CacheValue::Exists(true),
        ));
        Ok(writes)
    }

    fn cached_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> CacheResult<Vec<DraftDocument>> {
        let key = DraftCacheKey::list(tenant_id, project_id);
        match self.store.get(&key)? {
            Some(entry) => Ok(documents_of(&key, &entry)?.to_vec()),
            None => Ok(Vec::new()),
        }
    }

    fn begin_mutation(&self, prefix: ProjectPrefix) -> InFlight<'_> {
        InFlight::begin(&self.states, prefix, ProjectState::pending_count)
    }

    /// Wait until every earlier mutation of the project has finished.
    async fn take_turn(&self, prefix: ProjectPrefix) -> MutationTurn<'_> {
        let queue = self.queues.entry(prefix).or_default().clone();
        let guard = queue.lock_owned().await;
        MutationTurn {
            guard: Some(guard),
            queues: &self.queues,
            prefix,
        }
    }

    fn pending_mutations(&self, prefix: ProjectPrefix) -> u32 {
        self.states
            .get(&prefix)
            .map_or(0, |state| state.pending_mutations)
    }

    fn mark_synced(&self, prefix: ProjectPrefix) {
        let mut state = self.states.entry(prefix).or_default();
        state.synced = true;
        state.last_error = None;
    }
}

/// Every key a mutation touching `sections` may write.
fn mutation_keys(
    tenant_id: TenantId,
    project_id: ProjectId,
    sections: impl IntoIterator<Item = SectionType>,
) -> Vec<DraftCacheKey> {
    let mut keys: Vec<DraftCacheKey> = DraftCacheKey::list_variants(tenant_id, project_id)
        .into_iter()
        .chain(DraftCacheKey::content_variants(tenant_id, project_id))
        .chain([DraftCacheKey::exists(tenant_id, project_id)])
        .collect();
    for section in sections {
        let key = DraftCacheKey::by_type(tenant_id, project_id, section);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Writes that make every view reflect a freshly fetched document list.
fn server_writes(
    tenant_id: TenantId,
    project_id: ProjectId,
    documents: &[DraftDocument],
) -> Vec<CacheWrite> {
    let composed = ComposedContent::rebuild(documents.to_vec());
    let mut writes = Vec::with_capacity(4 + SectionType::SECTIONS.len());
    for skip_init in [false, true] {
        writes.push(CacheWrite::Set(
            DraftCacheKey::list_for(tenant_id, project_id, skip_init),
            CacheValue::Documents(documents.to_vec()),
        ));
        writes.push(CacheWrite::Set(
            DraftCacheKey::content_for(tenant_id, project_id, skip_init),
            CacheValue::Composed(composed.clone()),
        ));
    }
    for section in SectionType::SECTIONS {
        writes.push(CacheWrite::Set(
            DraftCacheKey::by_type(tenant_id, project_id, section),
            CacheValue::Document(latest_of(documents, section).cloned()),
        ));
    }
    writes
}

/// Writes that show `updates` in the cache before the server answers.
///
/// Lists that are not cached stay uncached; a partial list would hide the
/// sections nobody has fetched yet. With `recompose` the content views are
/// rebuilt from the merged lists, otherwise they are invalidated.
fn optimistic_writes(
    snapshot: &OptimisticSnapshot,
    tenant_id: TenantId,
    project_id: ProjectId,
    updates: &[SectionUpdate],
    recompose: bool,
) -> CacheResult<Vec<CacheWrite>> {
    // Last update per section wins.
    let latest: BTreeMap<SectionType, &SectionUpdate> = updates
        .iter()
        .map(|update| (update.section_type, update))
        .collect();

    let now = Utc::now();
    let base_list = DraftCacheKey::list(tenant_id, project_id);
    let mut writes = Vec::new();
    let mut documents = Vec::with_capacity(latest.len());
    for (section, update) in latest {
        let document = match known_document(snapshot, tenant_id, project_id, section)? {
            Some(mut existing) => {
                existing.content = update.content.clone();
                existing.updated_at = now;
                existing
            }
            None => DraftDocument::pending(project_id, section, update.content.clone()),
        };
        let key = DraftCacheKey::by_type(tenant_id, project_id, section);
        let cached_at = captured(snapshot, &key)
            .or_else(|| captured(snapshot, &base_list))
            .map_or(now, |entry| entry.cached_at);
        writes.push(CacheWrite::Put(
            key,
            CacheEntry {
                value: CacheValue::Document(Some(document.clone())),
                cached_at,
                invalidated: false,
            },
        ));
        documents.push(document);
    }

    for skip_init in [false, true] {
        let list_key = DraftCacheKey::list_for(tenant_id, project_id, skip_init);
        let content_key = DraftCacheKey::content_for(tenant_id, project_id, skip_init);
        match captured(snapshot, &list_key) {
            Some(entry) => {
                let mut merged = documents_of(&list_key, entry)?.to_vec();
                for document in &documents {
                    upsert_document(&mut merged, document.clone());
                }
                if recompose {
                    writes.push(derived(
                        content_key,
                        entry,
                        CacheValue::Composed(ComposedContent::rebuild(merged.clone())),
                    ));
                } else {
                    writes.push(CacheWrite::Invalidate(content_key));
                }
                writes.push(derived(list_key, entry, CacheValue::Documents(merged)));
            }
            None => writes.push(CacheWrite::Invalidate(content_key)),
        }
    }
    Ok(writes)
}

/// The cached document of a section, preferring the list views.
fn known_document(
    snapshot: &OptimisticSnapshot,
    tenant_id: TenantId,
    project_id: ProjectId,
    section: SectionType,
) -> CacheResult<Option<DraftDocument>> {
    for key in DraftCacheKey::list_variants(tenant_id, project_id) {
        if let Some(entry) = captured(snapshot, &key) {
            if let Some(document) = latest_of(documents_of(&key, entry)?, section) {
                return Ok(Some(document.clone()));
            }
        }
    }
    let key = DraftCacheKey::by_type(tenant_id, project_id, section);
    match captured(snapshot, &key) {
        Some(entry) => Ok(document_of(&key, entry)?.cloned()),
        None => Ok(None),
    }
}

/// A local rewrite of data derived from `source`.
///
/// Keeps the source's age and flag, so only a server fetch can make a view
/// fresh again.
fn derived(key: DraftCacheKey, source: &CacheEntry, value: CacheValue) -> CacheWrite {
    CacheWrite::Put(
        key,
        CacheEntry {
            value,
            cached_at: source.cached_at,
            invalidated: source.invalidated,
        },
    )
}

fn captured<'a>(snapshot: &'a OptimisticSnapshot, key: &DraftCacheKey) -> Option<&'a CacheEntry> {
    snapshot.get(key).and_then(Option::as_ref)
}

/// Most recently updated document of a section; later entries win ties.
fn latest_of(documents: &[DraftDocument], section: SectionType) -> Option<&DraftDocument> {
    documents
        .iter()
        .filter(|document| document.section_type == section)
        .max_by(|a, b| a.updated_at.cmp(&b.updated_at))
}

fn documents_of<'a>(key: &DraftCacheKey, entry: &'a CacheEntry) -> CacheResult<&'a [DraftDocument]> {
    entry
        .value
        .as_documents()
        .ok_or_else(|| unexpected(key, "documents"))
}

fn composed_of<'a>(key: &DraftCacheKey, entry: &'a CacheEntry) -> CacheResult<&'a ComposedContent> {
    entry
        .value
        .as_composed()
        .ok_or_else(|| unexpected(key, "composed"))
}

fn document_of<'a>(
    key: &DraftCacheKey,
    entry: &'a CacheEntry,
) -> CacheResult<Option<&'a DraftDocument>> {
    match &entry.value {
        CacheValue::Document(document) => Ok(document.as_ref()),
        _ => Err(unexpected(key, "document")),
    }
}

fn exists_of(key: &DraftCacheKey, entry: &CacheEntry) -> CacheResult<bool> {
    entry.value.as_exists().ok_or_else(|| unexpected(key, "exists"))
}

fn unexpected(key: &DraftCacheKey, expected: &'static str) -> CacheError {
    CacheError::UnexpectedValue {
        key: key.to_string(),
        expected,
    }
}
