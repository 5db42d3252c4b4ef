//! Fire-and-forget event fan-out to presentation surfaces.
//!
//! Events for a given job are delivered in production order; delivery to a
//! surface that has gone away is silently dropped, never an error.

use serde::Serialize;
use tokio::sync::broadcast;

/// Events the core pushes to all open surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    /// Partial or final summary text for a job.
    #[serde(rename = "STREAMING_UPDATE", rename_all = "camelCase")]
    StreamingUpdate {
        job_id: String,
        url: String,
        /// Display HTML.
        content: String,
        /// The unformatted summary text.
        raw_content: String,
    },
    /// A job has started working on a page.
    #[serde(rename = "PROCESSING_STATUS", rename_all = "camelCase")]
    ProcessingStatus {
        status: ProcessingStatus,
        url: Option<String>,
        title: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Started,
}

/// Cloneable sender half of the surface event bus.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send an event to whoever is listening. No listeners is fine.
    pub fn send(&self, event: BroadcastEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_subscribers_is_a_no_op() {
        let bus = Broadcaster::default();
        bus.send(BroadcastEvent::ProcessingStatus {
            status: ProcessingStatus::Started,
            url: None,
            title: "t".to_string(),
        });
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let bus = Broadcaster::default();
        let mut rx = bus.subscribe();
        for i in 0..3 {
            bus.send(BroadcastEvent::StreamingUpdate {
                job_id: "job-1".to_string(),
                url: "u".to_string(),
                content: format!("<p>{i}</p>"),
                raw_content: i.to_string(),
            });
        }
        for i in 0..3 {
            match rx.recv().await.unwrap() {
                BroadcastEvent::StreamingUpdate { raw_content, .. } => {
                    assert_eq!(raw_content, i.to_string());
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn streaming_update_wire_shape() {
        let event = BroadcastEvent::StreamingUpdate {
            job_id: "job-1".to_string(),
            url: "https://x.test/1".to_string(),
            content: "<p>hi</p>".to_string(),
            raw_content: "hi".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "STREAMING_UPDATE");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["rawContent"], "hi");
    }
}
