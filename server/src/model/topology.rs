use super::connection::ConnectionDescriptor;
use crate::broker::RuntimeInfo;
use chrono::{DateTime, Utc};

/// Detached result of listing a namespace, before it is placed in a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub connection: ConnectionDescriptor,
    pub topics: Vec<TopicNode>,
    pub queues: Vec<QueueNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicNode {
    pub name: String,
    pub subscriptions: Vec<SubscriptionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionNode {
    pub name: String,
    pub runtime: RuntimeInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueNode {
    pub name: String,
    pub runtime: RuntimeInfo,
}
