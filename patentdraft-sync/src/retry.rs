//! Retry with jittered exponential backoff for transient gateway failures.

use crate::config::RetryConfig;
use crate::gateway::{DraftGateway, GatewayResult, RestoreResponse};
use async_trait::async_trait;
use patentdraft_core::{DraftDocument, ProjectId, SectionUpdate, TenantId};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// How many times and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_ms: 200,
            max_ms: 5_000,
            multiplier: 2.0,
            jitter_ms: 50,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_ms: config.initial_ms,
            max_ms: config.max_ms,
            multiplier: config.multiplier,
            jitter_ms: config.jitter_ms,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Base delay before retry number `attempt` (zero based), without jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let mut delay = self.initial_ms;
        for _ in 0..attempt {
            let next = (delay as f64 * self.multiplier) as u64;
            delay = next.min(self.max_ms);
        }
        delay.min(self.max_ms)
    }

    /// Run `call` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = GatewayResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = jittered_backoff(self.base_delay_ms(attempt), self.jitter_ms);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %err,
                        "Transient gateway failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(
                        operation = operation,
                        attempts = attempt + 1,
                        transient = err.is_transient(),
                        "Gateway call failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

pub(crate) fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

/// Gateway decorator that retries transient failures of the wrapped gateway.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: DraftGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<G: DraftGateway> DraftGateway for RetryingGateway<G> {
    async fn list_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
    ) -> GatewayResult<Vec<DraftDocument>> {
        self.policy
            .run("list_documents", || {
                self.inner.list_documents(tenant_id, project_id, skip_init)
            })
            .await
    }

    async fn update_document(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        update: &SectionUpdate,
    ) -> GatewayResult<DraftDocument> {
        self.policy
            .run("update_document", || {
                self.inner.update_document(tenant_id, project_id, update)
            })
            .await
    }

    async fn batch_update(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        updates: &[SectionUpdate],
    ) -> GatewayResult<Vec<DraftDocument>> {
        self.policy
            .run("batch_update", || {
                self.inner.batch_update(tenant_id, project_id, updates)
            })
            .await
    }

    async fn restore_version(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        version_id: &str,
    ) -> GatewayResult<RestoreResponse> {
        self.policy
            .run("restore_version", || {
                self.inner.restore_version(tenant_id, project_id, version_id)
            })
            .await
    }

    async fn has_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> GatewayResult<bool> {
        self.policy
            .run("has_documents", || {
                self.inner.has_documents(tenant_id, project_id)
            })
            .await
    }
}
