//! PatentDraft Sync - draft reconciliation over the remote gateway.
//!
//! [`DraftReconciler`] ties a [`DraftGateway`] to a
//! [`patentdraft_cache::CacheStore`] and keeps every cached view of a project
//! consistent through optimistic writes, exact rollback and
//! generation-guarded hydration.

pub mod autosave;
pub mod config;
pub mod events;
pub mod gateway;
pub mod reconcile;
pub mod retry;
pub mod telemetry;

pub use autosave::{Autosaver, FlushReport};
pub use config::{AuthConfig, CacheSettings, RetryConfig, SyncConfig};
pub use events::{ContentOverride, EventBroadcaster, OverrideSource};
pub use gateway::{
    BatchUpdateRequest, BatchUpdateResponse, DraftGateway, ExistsResponse, GatewayResult,
    HttpDraftGateway, RestoreRequest, RestoreResponse,
};
pub use reconcile::{
    DraftReconciler, ProjectView, QueryState, ReconcilerOptions, RestoreOutcome, SyncPhase,
};
pub use retry::{RetryPolicy, RetryingGateway};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
