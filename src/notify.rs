//! Change notifications emitted after a successful commit.
//!
//! Observers are handed to [`UnitOfWorkFactory`](crate::uow::UnitOfWorkFactory)
//! at construction and are called synchronously, in registration order, on
//! the task that ran `commit`. Nothing is queued: an observer registered
//! after a commit never hears about it.

use crate::transaction::UnitId;
use tokio::sync::mpsc;

/// The distinct entity types written by one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub unit: UnitId,
    pub changed_types: Vec<&'static str>,
}

impl ChangeNotification {
    pub fn contains(&self, type_name: &str) -> bool {
        self.changed_types.iter().any(|t| *t == type_name)
    }
}

pub trait ChangeObserver: Send + Sync {
    fn entities_changed(&self, notification: &ChangeNotification);
}

impl<F> ChangeObserver for F
where
    F: Fn(&ChangeNotification) + Send + Sync,
{
    fn entities_changed(&self, notification: &ChangeNotification) {
        self(notification)
    }
}

/// Forwards notifications into an unbounded channel.
///
/// Once the receiver is dropped, notifications are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ChangeNotification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ChangeObserver for ChannelObserver {
    fn entities_changed(&self, notification: &ChangeNotification) {
        let _ = self.sender.send(notification.clone());
    }
}
