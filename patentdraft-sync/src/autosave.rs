//! Debounced autosave of section edits.
//!
//! Edits are coalesced per project, last edit per section winning, and sent
//! as one batch update once no new edit has arrived for the debounce period.

use crate::gateway::DraftGateway;
use crate::reconcile::DraftReconciler;
use patentdraft_cache::CacheStore;
use patentdraft_core::{
    ComposeError, DraftError, DraftResult, ProjectId, SectionType, SectionUpdate, TenantId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type ProjectKey = (TenantId, ProjectId);

enum Command {
    Edit {
        tenant_id: TenantId,
        project_id: ProjectId,
        update: SectionUpdate,
    },
    Flush(oneshot::Sender<FlushReport>),
}

/// Outcome of one save pass.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Sections the server accepted.
    pub saved: usize,
    pub failed: Vec<(ProjectId, DraftError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct PendingEdits {
    projects: HashMap<ProjectKey, BTreeMap<SectionType, String>>,
}

impl PendingEdits {
    fn queue(&mut self, project: ProjectKey, update: SectionUpdate) {
        self.projects
            .entry(project)
            .or_default()
            .insert(update.section_type, update.content);
    }

    /// Put failed edits back unless a newer edit of the section is waiting.
    fn requeue(&mut self, project: ProjectKey, updates: Vec<SectionUpdate>) {
        let edits = self.projects.entry(project).or_default();
        for update in updates {
            edits.entry(update.section_type).or_insert(update.content);
        }
    }

    fn take(&mut self) -> Vec<(ProjectKey, Vec<SectionUpdate>)> {
        self.projects
            .drain()
            .map(|(project, edits)| {
                let updates = edits
                    .into_iter()
                    .map(|(section, content)| SectionUpdate::new(section, content))
                    .collect();
                (project, updates)
            })
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Handle to a background autosave task.
pub struct Autosaver {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl Autosaver {
    /// Start the autosave task on the current runtime.
    pub fn spawn<G, S>(reconciler: Arc<DraftReconciler<G, S>>, debounce: Duration) -> Self
    where
        G: DraftGateway + 'static,
        S: CacheStore + 'static,
    {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(reconciler, debounce, receiver));
        Self { commands, task }
    }

    /// Queue an edit. Replaces any unsaved edit of the same section.
    pub fn queue_edit(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        update: SectionUpdate,
    ) -> DraftResult<()> {
        if update.section_type.is_reserved() {
            return Err(ComposeError::ReservedSection(update.section_type).into());
        }
        self.commands
            .send(Command::Edit {
                tenant_id,
                project_id,
                update,
            })
            .map_err(|_| DraftError::AutosaveStopped)
    }

    /// Save everything pending now and wait for the result.
    pub async fn flush(&self) -> DraftResult<FlushReport> {
        let (done, report) = oneshot::channel();
        self.commands
            .send(Command::Flush(done))
            .map_err(|_| DraftError::AutosaveStopped)?;
        report.await.map_err(|_| DraftError::AutosaveStopped)
    }

    /// Save everything pending and stop the task.
    pub async fn shutdown(self) -> DraftResult<FlushReport> {
        let report = self.flush().await?;
        drop(self.commands);
        self.task.await.map_err(|_| DraftError::AutosaveStopped)?;
        info!(saved = report.saved, "Autosaver stopped");
        Ok(report)
    }
}

async fn run<G, S>(
    reconciler: Arc<DraftReconciler<G, S>>,
    debounce: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    G: DraftGateway,
    S: CacheStore,
{
    let mut pending = PendingEdits::default();
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Edit { tenant_id, project_id, update }) => {
                    debug!(project_id = %project_id, section = %update.section_type, "Queued edit");
                    pending.queue((tenant_id, project_id), update);
                    deadline = Some(Instant::now() + debounce);
                }
                Some(Command::Flush(done)) => {
                    let report = save_pending(&reconciler, &mut pending).await;
                    deadline = next_deadline(&pending, debounce);
                    let _ = done.send(report);
                }
                None => {
                    let report = save_pending(&reconciler, &mut pending).await;
                    if !report.is_clean() {
                        warn!(failed = report.failed.len(), "Unsaved edits dropped at shutdown");
                    }
                    break;
                }
            },
            () = timer => {
                save_pending(&reconciler, &mut pending).await;
                deadline = next_deadline(&pending, debounce);
            }
        }
    }
}

fn next_deadline(pending: &PendingEdits, debounce: Duration) -> Option<Instant> {
    if pending.is_empty() {
        None
    } else {
        Some(Instant::now() + debounce)
    }
}

async fn save_pending<G, S>(
    reconciler: &DraftReconciler<G, S>,
    pending: &mut PendingEdits,
) -> FlushReport
where
    G: DraftGateway,
    S: CacheStore,
{
    let mut report = FlushReport::default();
    for ((tenant_id, project_id), updates) in pending.take() {
        let count = updates.len();
        match reconciler
            .batch_update(tenant_id, project_id, updates.clone())
            .await
        {
            Ok(_) => {
                debug!(project_id = %project_id, sections = count, "Autosaved edits");
                report.saved += count;
            }
            Err(err) if err.is_transient() => {
                warn!(project_id = %project_id, error = %err, "Autosave failed, edits requeued");
                pending.requeue((tenant_id, project_id), updates);
                report.failed.push((project_id, err));
            }
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "Autosave rejected, edits dropped");
                report.failed.push((project_id, err));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edits_coalesce_per_section() {
        let project = (TenantId::now_v7(), ProjectId::now_v7());
        let mut pending = PendingEdits::default();
        pending.queue(project, SectionUpdate::new(SectionType::Claims, "draft 1"));
        pending.queue(project, SectionUpdate::new(SectionType::Abstract, "abstract"));
        pending.queue(project, SectionUpdate::new(SectionType::Claims, "draft 2"));

        let taken = pending.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(
            taken[0].1,
            vec![
                SectionUpdate::new(SectionType::Claims, "draft 2"),
                SectionUpdate::new(SectionType::Abstract, "abstract"),
            ]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_requeue_keeps_newer_edits() {
        let project = (TenantId::now_v7(), ProjectId::now_v7());
        let mut pending = PendingEdits::default();
        pending.queue(project, SectionUpdate::new(SectionType::Claims, "newer"));

        pending.requeue(
            project,
            vec![
                SectionUpdate::new(SectionType::Claims, "older"),
                SectionUpdate::new(SectionType::Summary, "summary"),
            ],
        );

        let taken = pending.take();
        assert_eq!(
            taken[0].1,
            vec![
                SectionUpdate::new(SectionType::Summary, "summary"),
                SectionUpdate::new(SectionType::Claims, "newer"),
            ]
        );
    }
}
