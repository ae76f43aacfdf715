use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::store::RequestRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEventKind {
    RequestCreated,
    RequestUpdated,
}

/// A lifecycle notification carrying the full current record.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub event: RequestEventKind,
    pub record: RequestRecord,
}

/// Best-effort fan-out of record creations and updates to connected
/// observers. Delivery is not persisted: an observer connecting after an
/// event can only recover current state by polling the store. Lagging
/// receivers lose events rather than backpressuring publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RequestEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.tx.subscribe()
    }

    pub fn publish_created(&self, record: &RequestRecord) {
        self.publish(RequestEventKind::RequestCreated, record);
    }

    pub fn publish_updated(&self, record: &RequestRecord) {
        self.publish(RequestEventKind::RequestUpdated, record);
    }

    fn publish(&self, event: RequestEventKind, record: &RequestRecord) {
        // A send error only means nobody is listening right now.
        let receivers = self
            .tx
            .send(RequestEvent {
                event,
                record: record.clone(),
            })
            .unwrap_or(0);
        debug!(request_id = %record.id, ?event, receivers, "Published request event");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RequestKind, RequestStatus};
    use chrono::Utc;

    fn record(id: u64) -> RequestRecord {
        RequestRecord {
            id,
            kind: RequestKind::Access,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            payload: serde_json::Map::new(),
            result: None,
            error: None,
            comments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn subscribers_see_created_then_updated() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish_created(&record(1));
        bus.publish_updated(&record(1));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, RequestEventKind::RequestCreated);
        assert_eq!(first.record.id, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, RequestEventKind::RequestUpdated);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish_created(&record(7));
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(8);
        bus.publish_created(&record(1));

        let mut rx = bus.subscribe();
        bus.publish_updated(&record(1));

        let only = rx.recv().await.unwrap();
        assert_eq!(only.event, RequestEventKind::RequestUpdated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_serialize_with_snake_case_names() {
        let event = RequestEvent {
            event: RequestEventKind::RequestCreated,
            record: record(3),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "request_created");
        assert_eq!(json["record"]["id"], 3);
        assert_eq!(json["record"]["status"], "pending");
    }
}
