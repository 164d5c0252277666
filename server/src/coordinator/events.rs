use crate::common::ServiceBusError;
use crate::model::{QueueId, SubscriptionId};

/// One of the four message lists the coordinator keeps for a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStream {
    SubscriptionMessages,
    SubscriptionDeadLetters,
    QueueMessages,
    QueueDeadLetters,
}

impl MessageStream {
    pub fn is_dead_letter(self) -> bool {
        matches!(
            self,
            MessageStream::SubscriptionDeadLetters | MessageStream::QueueDeadLetters
        )
    }
}

/// A message-holding node of the current tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionRef {
    Subscription(SubscriptionId),
    Queue(QueueId),
}

impl CollectionRef {
    pub fn stream(self, is_dlq: bool) -> MessageStream {
        match (self, is_dlq) {
            (CollectionRef::Subscription(_), false) => MessageStream::SubscriptionMessages,
            (CollectionRef::Subscription(_), true) => MessageStream::SubscriptionDeadLetters,
            (CollectionRef::Queue(_), false) => MessageStream::QueueMessages,
            (CollectionRef::Queue(_), true) => MessageStream::QueueDeadLetters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Connect,
    Refresh,
    Send,
    Delete,
    DeadLetter,
    Resubmit,
    Purge,
    Transfer,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Connect => "connect",
            OperationKind::Refresh => "refresh",
            OperationKind::Send => "send",
            OperationKind::Delete => "delete",
            OperationKind::DeadLetter => "dead-letter",
            OperationKind::Resubmit => "resubmit",
            OperationKind::Purge => "purge",
            OperationKind::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TopologyChanged,
    FilterChanged,
    SelectionChanged,
    MessagesChanged { stream: MessageStream },
    CountsChanged { collection: CollectionRef },
    OperationCompleted { kind: OperationKind, affected: u64 },
    OperationFailed { kind: OperationKind, error: ServiceBusError },
    Busy(bool),
    Log(String),
}

/// Fan-out of engine events to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<flume::Sender<EngineEvent>>,
}

impl EventBus {
    pub fn subscribe(&mut self) -> flume::Receiver<EngineEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Delivers to every live subscriber; dropped receivers are pruned.
    pub fn publish(&mut self, event: EngineEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
