use super::events::CollectionRef;
use crate::model::{ConnectionDescriptor, EntityPath, EntityTree, QueueId, SubscriptionId, TopicId};

/// What the user currently has selected in the full tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Topic(TopicId),
    Subscription {
        topic: TopicId,
        subscription: SubscriptionId,
    },
    Queue(QueueId),
}

impl Selection {
    /// The message-holding node, if any. A bare topic holds no messages.
    pub fn collection(&self) -> Option<CollectionRef> {
        match *self {
            Selection::Subscription { subscription, .. } => {
                Some(CollectionRef::Subscription(subscription))
            }
            Selection::Queue(queue) => Some(CollectionRef::Queue(queue)),
            Selection::None | Selection::Topic(_) => None,
        }
    }

    pub fn topic(&self) -> Option<TopicId> {
        match *self {
            Selection::Topic(topic) | Selection::Subscription { topic, .. } => Some(topic),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Selection::None)
    }
}

/// Everything needed to talk to the broker about the selected collection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CollectionTarget {
    pub collection: CollectionRef,
    pub connection: ConnectionDescriptor,
    pub path: EntityPath,
}

impl CollectionTarget {
    pub fn resolve(tree: &EntityTree, collection: CollectionRef) -> Option<Self> {
        match collection {
            CollectionRef::Subscription(id) => {
                let subscription = tree.subscription(id)?;
                let topic = tree.topic(subscription.topic)?;
                let resource = tree.resource_of_topic(topic.id)?;
                Some(Self {
                    collection,
                    connection: resource.connection.clone(),
                    path: EntityPath::subscription(&topic.name, &subscription.name),
                })
            }
            CollectionRef::Queue(id) => {
                let queue = tree.queue(id)?;
                let resource = tree.resource(queue.resource)?;
                Some(Self {
                    collection,
                    connection: resource.connection.clone(),
                    path: EntityPath::queue(&queue.name),
                })
            }
        }
    }
}

/// Name-based form of a selection that survives a tree rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectionKey {
    connection: ConnectionDescriptor,
    node: NodeKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKey {
    Topic(String),
    Subscription { topic: String, name: String },
    Queue(String),
}

impl SelectionKey {
    pub fn of(selection: Selection, tree: &EntityTree) -> Option<Self> {
        let (resource, node) = match selection {
            Selection::None => return None,
            Selection::Topic(topic) => {
                let resource = tree.resource_of_topic(topic)?;
                (resource, NodeKey::Topic(tree.topic(topic)?.name.clone()))
            }
            Selection::Subscription {
                topic,
                subscription,
            } => {
                let resource = tree.resource_of_topic(topic)?;
                (
                    resource,
                    NodeKey::Subscription {
                        topic: tree.topic(topic)?.name.clone(),
                        name: tree.subscription(subscription)?.name.clone(),
                    },
                )
            }
            Selection::Queue(queue) => {
                let queue = tree.queue(queue)?;
                (tree.resource(queue.resource)?, NodeKey::Queue(queue.name.clone()))
            }
        };
        Some(Self {
            connection: resource.connection.clone(),
            node,
        })
    }

    /// Finds the same node in `tree`, or `Selection::None` if it is gone.
    pub fn resolve(&self, tree: &EntityTree) -> Selection {
        let Some(resource) = tree.resource_for_connection(&self.connection) else {
            return Selection::None;
        };
        let resource = resource.id;
        let resolved = match &self.node {
            NodeKey::Topic(name) => tree.find_topic(resource, name).map(Selection::Topic),
            NodeKey::Subscription { topic, name } => {
                tree.find_topic(resource, topic).and_then(|topic| {
                    tree.find_subscription(topic, name)
                        .map(|subscription| Selection::Subscription {
                            topic,
                            subscription,
                        })
                })
            }
            NodeKey::Queue(name) => tree.find_queue(resource, name).map(Selection::Queue),
        };
        resolved.unwrap_or_default()
    }
}
