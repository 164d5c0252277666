//! Arena of discovered topology.
//!
//! Entities are addressed by typed indices; children store their parent's id
//! instead of a pointer. A tree is never patched across topology refreshes:
//! the coordinator builds a new [`EntityTree`] and swaps it in, and the filter
//! builds a fresh copy on every search change.

use super::connection::ConnectionDescriptor;
use super::message::Message;
use super::topology::ResourceSnapshot;
use crate::broker::RuntimeInfo;
use chrono::{DateTime, Utc};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

entity_id!(ResourceId);
entity_id!(TopicId);
entity_id!(SubscriptionId);
entity_id!(QueueId);

/// A connected namespace.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub connection: ConnectionDescriptor,
    pub topics: Vec<TopicId>,
    pub queues: Vec<QueueId>,
}

/// Two resources are the same namespace when name and creation time match.
impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.created_at == other.created_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub resource: Option<ResourceId>,
    pub subscriptions: Vec<SubscriptionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub name: String,
    pub topic: TopicId,
    pub collection: MessageCollection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
    pub resource: ResourceId,
    pub collection: MessageCollection,
}

/// Live counts plus the locally loaded page of messages.
///
/// The counts are what the broker last reported; the lists hold at most one
/// fetch page each, so `messages.len()` is unrelated to `message_count`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageCollection {
    pub message_count: u64,
    pub dlq_count: u64,
    pub messages: Vec<Message>,
    pub dlq_messages: Vec<Message>,
}

impl MessageCollection {
    pub fn with_runtime(runtime: RuntimeInfo) -> Self {
        Self {
            message_count: runtime.message_count,
            dlq_count: runtime.dlq_count,
            ..Default::default()
        }
    }

    pub fn apply_runtime(&mut self, runtime: RuntimeInfo) {
        self.message_count = runtime.message_count;
        self.dlq_count = runtime.dlq_count;
    }

    pub fn messages(&self, is_dlq: bool) -> &[Message] {
        if is_dlq {
            &self.dlq_messages
        } else {
            &self.messages
        }
    }

    /// Replaces one stream's page; the previous page is discarded first.
    pub fn replace_messages(&mut self, is_dlq: bool, fetched: Vec<Message>) {
        let list = if is_dlq {
            &mut self.dlq_messages
        } else {
            &mut self.messages
        };
        list.clear();
        list.extend(fetched);
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.dlq_messages.clear();
    }

    /// Zeroes one side after a confirmed purge.
    pub fn reset(&mut self, is_dlq: bool) {
        if is_dlq {
            self.dlq_count = 0;
            self.dlq_messages.clear();
        } else {
            self.message_count = 0;
            self.messages.clear();
        }
    }

    /// Drops a deleted message from the local page and decrements its count.
    /// Returns whether the message was present locally.
    pub fn remove_message(&mut self, message_id: &str, sequence_number: i64, is_dlq: bool) -> bool {
        let (list, count) = if is_dlq {
            (&mut self.dlq_messages, &mut self.dlq_count)
        } else {
            (&mut self.messages, &mut self.message_count)
        };
        *count = count.saturating_sub(1);
        match list
            .iter()
            .position(|m| m.message_id == message_id && m.sequence_number == sequence_number)
        {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Which parts of a tree to keep when copying it.
pub(crate) struct Retain<'a> {
    pub resource: &'a dyn Fn(&Resource) -> bool,
    pub topic: &'a dyn Fn(&Topic) -> bool,
    pub subscription: &'a dyn Fn(&Subscription) -> bool,
    pub queue: &'a dyn Fn(&Queue) -> bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityTree {
    resources: Vec<Resource>,
    topics: Vec<Topic>,
    subscriptions: Vec<Subscription>,
    queues: Vec<Queue>,
}

impl EntityTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(
        &mut self,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
        connection: ConnectionDescriptor,
    ) -> ResourceId {
        let id = ResourceId(self.resources.len());
        self.resources.push(Resource {
            id,
            name: name.into(),
            created_at,
            connection,
            topics: Vec::new(),
            queues: Vec::new(),
        });
        id
    }

    /// Adds a topic, attached to `resource` when given.
    pub fn add_topic(&mut self, resource: Option<ResourceId>, name: impl Into<String>) -> TopicId {
        let id = TopicId(self.topics.len());
        self.topics.push(Topic {
            id,
            name: name.into(),
            resource: None,
            subscriptions: Vec::new(),
        });
        if let Some(resource) = resource {
            self.attach_topic(resource, id);
        }
        id
    }

    /// Attaches a detached topic. A topic that already has an owner is left
    /// untouched and `false` is returned.
    pub fn attach_topic(&mut self, resource: ResourceId, topic: TopicId) -> bool {
        let (Some(owner), Some(t)) = (
            self.resources.get_mut(resource.0),
            self.topics.get_mut(topic.0),
        ) else {
            return false;
        };
        if t.resource.is_some() {
            return false;
        }
        t.resource = Some(resource);
        owner.topics.push(topic);
        true
    }

    pub fn add_subscription(
        &mut self,
        topic: TopicId,
        name: impl Into<String>,
        runtime: RuntimeInfo,
    ) -> Option<SubscriptionId> {
        let id = SubscriptionId(self.subscriptions.len());
        self.topics.get_mut(topic.0)?.subscriptions.push(id);
        self.subscriptions.push(Subscription {
            id,
            name: name.into(),
            topic,
            collection: MessageCollection::with_runtime(runtime),
        });
        Some(id)
    }

    pub fn add_queue(
        &mut self,
        resource: ResourceId,
        name: impl Into<String>,
        runtime: RuntimeInfo,
    ) -> Option<QueueId> {
        let id = QueueId(self.queues.len());
        self.resources.get_mut(resource.0)?.queues.push(id);
        self.queues.push(Queue {
            id,
            name: name.into(),
            resource,
            collection: MessageCollection::with_runtime(runtime),
        });
        Some(id)
    }

    /// Builds a tree from freshly listed topology, one resource per snapshot.
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a ResourceSnapshot>) -> Self {
        let mut tree = EntityTree::new();
        for snapshot in snapshots {
            tree.add_snapshot(snapshot);
        }
        tree
    }

    /// Appends one listed namespace with its topics, subscriptions and queues.
    pub fn add_snapshot(&mut self, snapshot: &ResourceSnapshot) -> ResourceId {
        let resource = self.add_resource(
            snapshot.name.clone(),
            snapshot.created_at,
            snapshot.connection.clone(),
        );
        for topic in &snapshot.topics {
            let topic_id = self.add_topic(Some(resource), topic.name.clone());
            for sub in &topic.subscriptions {
                self.add_subscription(topic_id, sub.name.clone(), sub.runtime);
            }
        }
        for queue in &snapshot.queues {
            self.add_queue(resource, queue.name.clone(), queue.runtime);
        }
        resource
    }

    /// Builds a new tree holding only the entities accepted by `retain`.
    ///
    /// Arena order is preserved, so keeping everything yields a tree equal to
    /// `self`. A child is dropped along with its parent.
    pub(crate) fn copy_retaining(&self, retain: Retain<'_>) -> EntityTree {
        let mut tree = EntityTree::new();
        let mut resource_map = vec![None; self.resources.len()];
        let mut topic_map = vec![None; self.topics.len()];

        for resource in &self.resources {
            if (retain.resource)(resource) {
                resource_map[resource.id.0] = Some(tree.add_resource(
                    resource.name.clone(),
                    resource.created_at,
                    resource.connection.clone(),
                ));
            }
        }

        for topic in &self.topics {
            let parent = match topic.resource {
                Some(owner) => match resource_map[owner.0] {
                    Some(mapped) => Some(mapped),
                    None => continue,
                },
                None => None,
            };
            if (retain.topic)(topic) {
                topic_map[topic.id.0] = Some(tree.add_topic(parent, topic.name.clone()));
            }
        }

        for sub in &self.subscriptions {
            let Some(parent) = topic_map[sub.topic.0] else {
                continue;
            };
            if (retain.subscription)(sub) {
                if let Some(id) = tree.add_subscription(parent, sub.name.clone(), RuntimeInfo::default()) {
                    tree.subscriptions[id.0].collection = sub.collection.clone();
                }
            }
        }

        for queue in &self.queues {
            let Some(parent) = resource_map[queue.resource.0] else {
                continue;
            };
            if (retain.queue)(queue) {
                if let Some(id) = tree.add_queue(parent, queue.name.clone(), RuntimeInfo::default()) {
                    tree.queues[id.0].collection = queue.collection.clone();
                }
            }
        }

        tree
    }

    /// Copy without the given resource and its children.
    pub fn without_resource(&self, resource: ResourceId) -> EntityTree {
        self.copy_retaining(Retain {
            resource: &|r| r.id != resource,
            topic: &|_| true,
            subscription: &|_| true,
            queue: &|_| true,
        })
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Every topic in the arena, attached or not.
    pub(crate) fn all_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    pub(crate) fn all_subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    pub(crate) fn all_queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.iter()
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(id.0)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(id.0)
    }

    pub fn subscription_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(id.0)
    }

    pub fn queue(&self, id: QueueId) -> Option<&Queue> {
        self.queues.get(id.0)
    }

    pub fn queue_mut(&mut self, id: QueueId) -> Option<&mut Queue> {
        self.queues.get_mut(id.0)
    }

    pub fn topics_of(&self, resource: ResourceId) -> impl Iterator<Item = &Topic> {
        self.resource(resource)
            .into_iter()
            .flat_map(|r| r.topics.iter())
            .filter_map(|id| self.topic(*id))
    }

    pub fn subscriptions_of(&self, topic: TopicId) -> impl Iterator<Item = &Subscription> {
        self.topic(topic)
            .into_iter()
            .flat_map(|t| t.subscriptions.iter())
            .filter_map(|id| self.subscription(*id))
    }

    pub fn queues_of(&self, resource: ResourceId) -> impl Iterator<Item = &Queue> {
        self.resource(resource)
            .into_iter()
            .flat_map(|r| r.queues.iter())
            .filter_map(|id| self.queue(*id))
    }

    pub fn resource_for_connection(&self, connection: &ConnectionDescriptor) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.connection == connection)
    }

    pub fn find_topic(&self, resource: ResourceId, name: &str) -> Option<TopicId> {
        self.topics_of(resource).find(|t| t.name == name).map(|t| t.id)
    }

    pub fn find_subscription(&self, topic: TopicId, name: &str) -> Option<SubscriptionId> {
        self.subscriptions_of(topic)
            .find(|s| s.name == name)
            .map(|s| s.id)
    }

    pub fn find_queue(&self, resource: ResourceId, name: &str) -> Option<QueueId> {
        self.queues_of(resource).find(|q| q.name == name).map(|q| q.id)
    }

    /// Owning resource of a topic, if attached.
    pub fn resource_of_topic(&self, topic: TopicId) -> Option<&Resource> {
        self.topic(topic)
            .and_then(|t| t.resource)
            .and_then(|r| self.resource(r))
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Attached topics across every resource.
    pub fn topic_count(&self) -> usize {
        self.resources.iter().map(|r| r.topics.len()).sum()
    }

    pub fn queue_count(&self) -> usize {
        self.resources.iter().map(|r| r.queues.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(message_count: u64, dlq_count: u64) -> RuntimeInfo {
        RuntimeInfo {
            message_count,
            dlq_count,
        }
    }

    fn sample() -> (EntityTree, ResourceId) {
        let mut tree = EntityTree::new();
        let ns = tree.add_resource(
            "ns",
            Utc::now(),
            ConnectionDescriptor::new("Endpoint=sb://ns.servicebus.windows.net/", true),
        );
        let events = tree.add_topic(Some(ns), "events");
        tree.add_subscription(events, "audit", runtime(3, 1));
        tree.add_queue(ns, "orders", runtime(5, 0));
        (tree, ns)
    }

    #[test]
    fn children_reference_their_parent() {
        let (tree, ns) = sample();
        let topic = tree.topics_of(ns).next().unwrap();
        assert_eq!(topic.resource, Some(ns));
        let sub = tree.subscriptions_of(topic.id).next().unwrap();
        assert_eq!(sub.topic, topic.id);
        assert_eq!(sub.collection.message_count, 3);
        let queue = tree.queues_of(ns).next().unwrap();
        assert_eq!(queue.resource, ns);
        assert_eq!(tree.topic_count(), 1);
        assert_eq!(tree.queue_count(), 1);
    }

    #[test]
    fn attached_topic_cannot_be_reparented() {
        let (mut tree, ns) = sample();
        let other = tree.add_resource("other", Utc::now(), ConnectionDescriptor::new("x", true));
        let topic = tree.find_topic(ns, "events").unwrap();
        assert!(!tree.attach_topic(other, topic));
        assert_eq!(tree.topic(topic).unwrap().resource, Some(ns));
    }

    #[test]
    fn keeping_everything_is_an_identical_copy() {
        let (tree, _) = sample();
        let copy = tree.copy_retaining(Retain {
            resource: &|_| true,
            topic: &|_| true,
            subscription: &|_| true,
            queue: &|_| true,
        });
        assert_eq!(copy, tree);
    }

    #[test]
    fn removing_a_resource_drops_its_children() {
        let (tree, ns) = sample();
        let copy = tree.without_resource(ns);
        assert!(copy.is_empty());
        assert_eq!(copy.topic_count(), 0);
    }

    #[test]
    fn remove_message_decrements_count() {
        let mut collection = MessageCollection::with_runtime(runtime(2, 0));
        assert!(!collection.remove_message("missing", 1, false));
        assert_eq!(collection.message_count, 1);
        collection.reset(false);
        assert_eq!(collection.message_count, 0);
    }
}
