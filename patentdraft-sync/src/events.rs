//! Content override notifications.
//!
//! Editors outside this crate listen for overrides so they can replace their
//! buffer after a version restore. Delivery is best effort: an event sent
//! with nobody listening is dropped, and a lagging receiver misses events.

use patentdraft_core::ProjectId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Where an authoritative content override came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideSource {
    VersionRestore,
}

/// Authoritative composed content for a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentOverride {
    pub project_id: ProjectId,
    pub content: String,
    pub source: OverrideSource,
    pub version_name: String,
}

impl ContentOverride {
    pub fn version_restore(
        project_id: ProjectId,
        content: impl Into<String>,
        version_name: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            content: content.into(),
            source: OverrideSource::VersionRestore,
            version_name: version_name.into(),
        }
    }
}

/// Process-wide fan-out of [`ContentOverride`] events.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ContentOverride>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to every current subscriber without waiting.
    pub fn broadcast(&self, event: ContentOverride) {
        let project_id = event.project_id;
        match self.tx.send(event) {
            Ok(receiver_count) => {
                debug!(
                    project_id = %project_id,
                    receivers = receiver_count,
                    "Broadcast content override"
                );
            }
            Err(_) => {
                debug!(project_id = %project_id, "No receivers for content override");
            }
        }
    }

    /// Broadcast `event` once `delay` has elapsed.
    pub fn broadcast_after(&self, delay: Duration, event: ContentOverride) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broadcaster.broadcast(event);
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentOverride> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wire_shape() {
        let project = ProjectId::now_v7();
        let value =
            serde_json::to_value(ContentOverride::version_restore(project, "FINAL", "v3")).unwrap();

        assert_eq!(value["projectId"], project.to_string());
        assert_eq!(value["content"], "FINAL");
        assert_eq!(value["source"], "versionRestore");
        assert_eq!(value["versionName"], "v3");
    }

    #[tokio::test]
    async fn test_broadcast_without_receivers_is_dropped() {
        let broadcaster = EventBroadcaster::new(4);
        broadcaster.broadcast(ContentOverride::version_restore(ProjectId::now_v7(), "x", "v1"));
        assert_eq!(broadcaster.receiver_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_after_waits_for_delay() {
        let broadcaster = EventBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        let event = ContentOverride::version_restore(ProjectId::now_v7(), "FINAL", "v3");

        let handle = broadcaster.broadcast_after(Duration::from_millis(100), event.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        handle.await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
