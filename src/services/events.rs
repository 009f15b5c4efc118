// Page events - in-process notifications for page edits and tree moves

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    /// A page was saved through the admin or the service API.
    Edited { page_id: i64, created: bool },
    /// Pages were reparented or reordered; `branch_ids` are the moved roots.
    Moved { branch_ids: Vec<i64> },
    Copied { original_id: i64, draft_id: i64 },
    Merged { original_id: i64, draft_id: i64 },
    Deleted { page_ids: Vec<i64> },
}

/// Fan-out bus for `PageEvent`s. Publishing with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct PageEvents {
    sender: broadcast::Sender<PageEvent>,
}

impl PageEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: PageEvent) {
        tracing::debug!(?event, "page event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.sender.subscribe()
    }
}

impl Default for PageEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = PageEvents::default();
        events.publish(PageEvent::Deleted { page_ids: vec![1] });

        let mut rx = events.subscribe();
        events.publish(PageEvent::Edited { page_id: 4, created: true });
        assert_eq!(rx.recv().await.unwrap(), PageEvent::Edited { page_id: 4, created: true });
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(PageEvent::Moved { branch_ids: vec![2, 3] }).unwrap();
        assert_eq!(json["event"], "moved");
        assert_eq!(json["branch_ids"], serde_json::json!([2, 3]));
    }
}
