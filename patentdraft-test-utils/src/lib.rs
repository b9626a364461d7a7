//! PatentDraft Test Utilities
//!
//! Shared test infrastructure for the PatentDraft workspace:
//! - A scriptable in-memory backend implementing `DraftGateway`
//! - Proptest generators for sections and updates
//! - Fixtures for configs, documents and reconcilers

pub use patentdraft_cache::{CacheStore, DraftCacheKey, Freshness, InMemoryCacheStore};
pub use patentdraft_core::{
    DocumentId, DraftDocument, DraftError, GatewayError, ProjectId, SectionType, SectionUpdate,
    TenantId,
};
pub use patentdraft_sync::{DraftGateway, DraftReconciler, GatewayResult, RestoreResponse};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

// ============================================================================
// MOCK GATEWAY
// ============================================================================

/// Gateway operations, for scripting and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    List,
    Update,
    Batch,
    Restore,
    Exists,
}

/// Holds calls of one operation until released.
#[derive(Debug, Clone)]
pub struct PauseHandle {
    gate: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl PauseHandle {
    /// Wait until a call has reached the pause point.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one held call continue.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

type ProjectKey = (TenantId, ProjectId);

#[derive(Default)]
struct MockState {
    documents: Mutex<HashMap<ProjectKey, Vec<DraftDocument>>>,
    failures: Mutex<HashMap<GatewayOp, VecDeque<GatewayError>>>,
    pauses: Mutex<HashMap<GatewayOp, PauseHandle>>,
    restore: Mutex<Option<RestoreResponse>>,
    batches: Mutex<Vec<Vec<SectionUpdate>>>,
    lost_responses: Mutex<HashMap<GatewayOp, usize>>,
    calls: Mutex<HashMap<GatewayOp, usize>>,
    assigned_ids: AtomicUsize,
}

/// In-memory backend with scripted failures and pause points.
///
/// Updates upsert by section type, so replaying the same request never
/// duplicates a section. Clones share state, so a test can keep a handle
/// after moving one into a reconciler.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the server's documents for a project.
    pub fn seed(&self, tenant_id: TenantId, project_id: ProjectId, documents: Vec<DraftDocument>) {
        self.state
            .documents
            .lock()
            .unwrap()
            .insert((tenant_id, project_id), documents);
    }

    /// The server's documents for a project.
    pub fn documents(&self, tenant_id: TenantId, project_id: ProjectId) -> Vec<DraftDocument> {
        self.state
            .documents
            .lock()
            .unwrap()
            .get(&(tenant_id, project_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: GatewayOp, error: GatewayError, times: usize) {
        let mut failures = self.state.failures.lock().unwrap();
        let queue = failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Apply the next `times` calls of `op` on the server but fail them as
    /// if the response never arrived.
    pub fn lose_next_response(&self, op: GatewayOp, times: usize) {
        *self.state.lost_responses.lock().unwrap().entry(op).or_insert(0) += times;
    }

    /// Hold every later call of `op` at its pause point until released.
    ///
    /// A held list call has already read the documents it will return.
    pub fn pause(&self, op: GatewayOp) -> PauseHandle {
        let handle = PauseHandle {
            gate: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        };
        self.state
            .pauses
            .lock()
            .unwrap()
            .insert(op, handle.clone());
        handle
    }

    /// Stop holding calls of `op`. Calls already held stay held.
    pub fn resume(&self, op: GatewayOp) {
        self.state.pauses.lock().unwrap().remove(&op);
    }

    /// What the next restore returns. The stored documents are left alone,
    /// as with a lagging read replica.
    pub fn script_restore(&self, content: impl Into<String>, version_name: impl Into<String>) {
        *self.state.restore.lock().unwrap() = Some(RestoreResponse {
            content: content.into(),
            version_name: version_name.into(),
            document_count: 0,
        });
    }

    pub fn calls(&self, op: GatewayOp) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Bodies of every batch request received, including failed ones.
    pub fn batches(&self) -> Vec<Vec<SectionUpdate>> {
        self.state.batches.lock().unwrap().clone()
    }

    async fn enter(&self, op: GatewayOp) -> GatewayResult<()> {
        *self.state.calls.lock().unwrap().entry(op).or_insert(0) += 1;

        let pause = self.state.pauses.lock().unwrap().get(&op).cloned();
        if let Some(pause) = pause {
            pause.entered.notify_one();
            if let Ok(permit) = pause.gate.acquire().await {
                permit.forget();
            }
        }

        match self
            .state
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn response_lost(&self, op: GatewayOp) -> GatewayResult<()> {
        let mut lost = self.state.lost_responses.lock().unwrap();
        match lost.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(GatewayError::Transport("connection reset before response".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn save(&self, tenant_id: TenantId, project_id: ProjectId, update: &SectionUpdate) -> DraftDocument {
        let now = Utc::now();
        let mut all = self.state.documents.lock().unwrap();
        let documents = all.entry((tenant_id, project_id)).or_default();
        match documents
            .iter_mut()
            .find(|doc| doc.section_type == update.section_type)
        {
            Some(existing) => {
                existing.content = update.content.clone();
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                self.state.assigned_ids.fetch_add(1, Ordering::Relaxed);
                let saved = DraftDocument {
                    id: DocumentId::Confirmed(Uuid::now_v7()),
                    project_id,
                    section_type: update.section_type,
                    content: update.content.clone(),
                    created_at: now,
                    updated_at: now,
                };
                documents.push(saved.clone());
                saved
            }
        }
    }

    /// How many documents the server has created.
    pub fn assigned_ids(&self) -> usize {
        self.state.assigned_ids.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DraftGateway for MockGateway {
    async fn list_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        _skip_init: bool,
    ) -> GatewayResult<Vec<DraftDocument>> {
        let documents = self.documents(tenant_id, project_id);
        self.enter(GatewayOp::List).await?;
        Ok(documents)
    }

    async fn update_document(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        update: &SectionUpdate,
    ) -> GatewayResult<DraftDocument> {
        self.enter(GatewayOp::Update).await?;
        let saved = self.save(tenant_id, project_id, update);
        self.response_lost(GatewayOp::Update)?;
        Ok(saved)
    }

    async fn batch_update(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        updates: &[SectionUpdate],
    ) -> GatewayResult<Vec<DraftDocument>> {
        self.state.batches.lock().unwrap().push(updates.to_vec());
        self.enter(GatewayOp::Batch).await?;
        let saved: Vec<DraftDocument> = updates
            .iter()
            .map(|update| self.save(tenant_id, project_id, update))
            .collect();
        self.response_lost(GatewayOp::Batch)?;
        Ok(saved)
    }

    async fn restore_version(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        version_id: &str,
    ) -> GatewayResult<RestoreResponse> {
        self.enter(GatewayOp::Restore).await?;
        let document_count = self.documents(tenant_id, project_id).len() as u32;
        let scripted = self.state.restore.lock().unwrap().clone();
        Ok(match scripted {
            Some(response) => RestoreResponse {
                document_count,
                ..response
            },
            None => RestoreResponse {
                content: String::new(),
                version_name: version_id.to_string(),
                document_count,
            },
        })
    }

    async fn has_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> GatewayResult<bool> {
        self.enter(GatewayOp::Exists).await?;
        Ok(!self.documents(tenant_id, project_id).is_empty())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for draft types.

    use super::*;
    use proptest::prelude::*;

    /// Any composable section type.
    pub fn arb_section_type() -> impl Strategy<Value = SectionType> {
        proptest::sample::select(SectionType::SECTIONS.to_vec())
    }

    /// Short section text, sometimes blank.
    pub fn arb_content() -> impl Strategy<Value = String> {
        prop_oneof![
            1 => Just(String::new()),
            1 => Just("   ".to_string()),
            8 => "[A-Za-z][A-Za-z0-9 .,]{0,40}",
        ]
    }

    pub fn arb_section_update() -> impl Strategy<Value = SectionUpdate> {
        (arb_section_type(), arb_content())
            .prop_map(|(section, content)| SectionUpdate::new(section, content))
    }

    /// A non-empty batch, possibly naming a section twice.
    pub fn arb_batch() -> impl Strategy<Value = Vec<SectionUpdate>> {
        proptest::collection::vec(arb_section_update(), 1..6)
    }

    /// A single update or a batch.
    #[derive(Debug, Clone)]
    pub enum Mutation {
        Single(SectionUpdate),
        Batch(Vec<SectionUpdate>),
    }

    pub fn arb_mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            arb_section_update().prop_map(Mutation::Single),
            arb_batch().prop_map(Mutation::Batch),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use patentdraft_sync::{
        AuthConfig, CacheSettings, ReconcilerOptions, RetryConfig, SyncConfig,
    };

    pub type TestReconciler = DraftReconciler<MockGateway, InMemoryCacheStore>;

    /// A server-confirmed document.
    pub fn doc(project_id: ProjectId, section: SectionType, content: &str) -> DraftDocument {
        let now = Utc::now();
        DraftDocument {
            id: DocumentId::Confirmed(Uuid::now_v7()),
            project_id,
            section_type: section,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh tenant and project whose server holds `sections`.
    pub fn project_with_sections(
        sections: &[(SectionType, &str)],
    ) -> (TenantId, ProjectId, MockGateway) {
        let tenant_id = TenantId::now_v7();
        let project_id = ProjectId::now_v7();
        let gateway = MockGateway::new();
        gateway.seed(
            tenant_id,
            project_id,
            sections
                .iter()
                .map(|(section, content)| doc(project_id, *section, content))
                .collect(),
        );
        (tenant_id, project_id, gateway)
    }

    /// Options with no broadcast delay.
    pub fn test_options() -> ReconcilerOptions {
        ReconcilerOptions {
            override_broadcast_delay: std::time::Duration::ZERO,
            ..ReconcilerOptions::default()
        }
    }

    pub fn reconciler(gateway: MockGateway) -> TestReconciler {
        DraftReconciler::new(gateway, InMemoryCacheStore::default(), test_options())
    }

    /// Every key of a project, for whole-cache comparisons.
    pub fn all_keys(tenant_id: TenantId, project_id: ProjectId) -> Vec<DraftCacheKey> {
        DraftCacheKey::list_variants(tenant_id, project_id)
            .into_iter()
            .chain(DraftCacheKey::content_variants(tenant_id, project_id))
            .chain([DraftCacheKey::exists(tenant_id, project_id)])
            .chain(
                SectionType::SECTIONS
                    .into_iter()
                    .map(|section| DraftCacheKey::by_type(tenant_id, project_id, section)),
            )
            .collect()
    }

    /// A valid config pointing at a local backend.
    pub fn base_config() -> SyncConfig {
        SyncConfig {
            api_base_url: "http://localhost:3000".to_string(),
            tenant_id: Uuid::now_v7(),
            auth: AuthConfig {
                api_key: Some("test-key".to_string()),
                jwt: None,
            },
            request_timeout_ms: 5_000,
            retry: RetryConfig {
                max_retries: 3,
                initial_ms: 10,
                max_ms: 100,
                multiplier: 2.0,
                jitter_ms: 0,
            },
            cache: CacheSettings::default(),
            autosave_debounce_ms: 1_500,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over reconciler results.

    use super::*;

    /// Assert that a result failed with the given HTTP status.
    #[track_caller]
    pub fn assert_status<T: std::fmt::Debug>(result: &Result<T, DraftError>, status: u16) {
        match result {
            Err(err) if err.status() == Some(status) => {}
            other => panic!("Expected error with status {}, got: {:?}", status, other),
        }
    }

    /// Assert that content contains every needle and none of the excluded.
    #[track_caller]
    pub fn assert_content(content: &str, contains: &[&str], excludes: &[&str]) {
        for needle in contains {
            assert!(content.contains(needle), "Expected {:?} in {:?}", needle, content);
        }
        for needle in excludes {
            assert!(!content.contains(needle), "Did not expect {:?} in {:?}", needle, content);
        }
    }
}
