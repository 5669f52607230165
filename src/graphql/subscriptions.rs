//! Change-event broker feeding the `*_changes` subscription fields.
//!
//! Mutations broadcast here after they commit; each subscription filters
//! the stream down to its table. The feed is process-local: changes applied
//! outside this process are not observed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::convert::Record;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    Error,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
            ChangeOp::Error => "ERROR",
        }
    }
}

/// One committed change.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub timestamp: DateTime<Utc>,
    /// Row state after the change (before it, for deletes).
    pub data: Record,
    /// Pre-image for updates and deletes.
    pub old: Option<Record>,
    /// Post-image for inserts and updates.
    pub new: Option<Record>,
}

/// Broadcast fan-out; add to schema data and have mutations call
/// [`ChangeBroker::publish`] after commit.
pub struct ChangeBroker {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBroker {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self { sender })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let broker = ChangeBroker::new(16);
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();

        broker.publish(ChangeEvent {
            table: "customer".into(),
            op: ChangeOp::Insert,
            timestamp: Utc::now(),
            data: Record::default(),
            old: None,
            new: Some(Record::default()),
        });

        assert_eq!(a.recv().await.unwrap().table, "customer");
        assert_eq!(b.recv().await.unwrap().table, "customer");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let broker = ChangeBroker::new(4);
        broker.publish(ChangeEvent {
            table: "t".into(),
            op: ChangeOp::Delete,
            timestamp: Utc::now(),
            data: Record::default(),
            old: None,
            new: None,
        });
    }
}
