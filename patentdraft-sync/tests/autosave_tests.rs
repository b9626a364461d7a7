//! Debounced autosave against the in-memory backend.

use patentdraft_core::{ComposeError, DraftError, GatewayError, SectionType, SectionUpdate};
use patentdraft_sync::Autosaver;
use patentdraft_test_utils::fixtures::{project_with_sections, reconciler};
use patentdraft_test_utils::GatewayOp;
use std::sync::Arc;
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(1_500);

#[tokio::test(start_paused = true)]
async fn edits_within_the_debounce_window_become_one_batch() {
    let (tenant, project, gateway) = project_with_sections(&[]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway.clone())), DEBOUNCE);

    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Claims, "a"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Claims, "b"))
        .unwrap();
    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Abstract, "c"))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(gateway.batches().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        gateway.batches(),
        vec![vec![
            SectionUpdate::new(SectionType::Claims, "b"),
            SectionUpdate::new(SectionType::Abstract, "c"),
        ]]
    );
    assert_eq!(gateway.documents(tenant, project).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn flush_saves_without_waiting() {
    let (tenant, project, gateway) = project_with_sections(&[(SectionType::Title, "Widget")]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway.clone())), DEBOUNCE);

    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Summary, "A summary."))
        .unwrap();
    let report = autosaver.flush().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.saved, 1);
    assert_eq!(gateway.calls(GatewayOp::Batch), 1);

    // Nothing left for the timer.
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(gateway.calls(GatewayOp::Batch), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_on_the_next_pass() {
    let (tenant, project, gateway) = project_with_sections(&[]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway.clone())), DEBOUNCE);
    gateway.fail_next(
        GatewayOp::Batch,
        GatewayError::Status {
            status: 503,
            message: "Service unavailable".into(),
        },
        1,
    );

    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Claims, "1. A widget."))
        .unwrap();
    let report = autosaver.flush().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.status(), Some(503));
    assert!(gateway.documents(tenant, project).is_empty());

    tokio::time::sleep(DEBOUNCE + Duration::from_millis(100)).await;
    assert_eq!(gateway.calls(GatewayOp::Batch), 2);
    let saved = gateway.documents(tenant, project);
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].content, "1. A widget.");
}

#[tokio::test(start_paused = true)]
async fn requeued_edits_do_not_overwrite_newer_ones() {
    let (tenant, project, gateway) = project_with_sections(&[]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway.clone())), DEBOUNCE);
    gateway.fail_next(GatewayOp::Batch, GatewayError::Transport("offline".into()), 1);

    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Claims, "old"))
        .unwrap();
    autosaver.flush().await.unwrap();
    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Claims, "new"))
        .unwrap();
    let report = autosaver.flush().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(gateway.documents(tenant, project)[0].content, "new");
}

#[tokio::test(start_paused = true)]
async fn rejected_edits_are_dropped() {
    let (tenant, project, gateway) = project_with_sections(&[]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway.clone())), DEBOUNCE);
    gateway.fail_next(
        GatewayOp::Batch,
        GatewayError::Status {
            status: 422,
            message: "Invalid content".into(),
        },
        1,
    );

    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Claims, "bad"))
        .unwrap();
    let report = autosaver.flush().await.unwrap();
    assert_eq!(report.failed.len(), 1);

    let report = autosaver.flush().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.saved, 0);
    assert_eq!(gateway.batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_saves_pending_edits() {
    let (tenant, project, gateway) = project_with_sections(&[]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway.clone())), DEBOUNCE);

    autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::Title, "Widget"))
        .unwrap();
    let report = autosaver.shutdown().await.unwrap();

    assert_eq!(report.saved, 1);
    assert_eq!(gateway.documents(tenant, project).len(), 1);
}

#[tokio::test]
async fn reserved_sections_cannot_be_queued() {
    let (tenant, project, gateway) = project_with_sections(&[]);
    let autosaver = Autosaver::spawn(Arc::new(reconciler(gateway)), DEBOUNCE);

    let err = autosaver
        .queue_edit(tenant, project, SectionUpdate::new(SectionType::FullContent, "all"))
        .unwrap_err();
    assert!(matches!(
        err,
        DraftError::Compose(ComposeError::ReservedSection(SectionType::FullContent))
    ));
}
