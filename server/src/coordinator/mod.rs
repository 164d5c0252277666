//! Orchestration of connections, selection and message lifecycle.
//!
//! The [`Coordinator`] owns the full entity tree, the filtered copy shown to
//! the user, the current selection and the fetched message pages. It is the
//! only place that mutates them, and it does so after awaited broker calls
//! complete. Observers follow changes through [`Coordinator::subscribe`].

pub mod events;
pub mod selection;

pub use crate::helper::SCAN_WARNING;
pub use events::{CollectionRef, EngineEvent, EventBus, MessageStream, OperationKind};
pub use selection::Selection;

use crate::broker::{BrokerClient, RuntimeInfo};
use crate::common::{ServiceBusError, ServiceBusResult};
use crate::config::EngineConfig;
use crate::filter::{SearchFilter, filter_tree};
use crate::helper::{QueueHelper, TopicHelper};
use crate::model::{
    ConnectionDescriptor, EntityPath, EntityTree, Message, MessageCollection, QueueId,
    ResourceId, ResourceSnapshot, SubscriptionId, TopicId,
};
use futures::future::try_join_all;
use selection::{CollectionTarget, SelectionKey};
use std::sync::Arc;

/// Result of a lifecycle operation. `affected == 0` means nothing matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOutcome {
    pub kind: OperationKind,
    pub affected: u64,
}

/// Labels for the message and topology tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabHeaders {
    pub messages: String,
    pub dead_letters: String,
    pub topics: String,
    pub queues: String,
}

/// One stream's fetch result, applied to the tree after all streams finish.
struct StreamFetch {
    stream: MessageStream,
    runtime: Option<RuntimeInfo>,
    messages: Vec<Message>,
}

enum Lifecycle<'a> {
    Delete(&'a Message),
    DeadLetter(&'a Message),
    Resubmit(&'a Message),
    Purge(bool),
    Transfer,
}

impl Lifecycle<'_> {
    fn kind(&self) -> OperationKind {
        match self {
            Lifecycle::Delete(_) => OperationKind::Delete,
            Lifecycle::DeadLetter(_) => OperationKind::DeadLetter,
            Lifecycle::Resubmit(_) => OperationKind::Resubmit,
            Lifecycle::Purge(_) => OperationKind::Purge,
            Lifecycle::Transfer => OperationKind::Transfer,
        }
    }
}

pub struct Coordinator {
    topic_helper: TopicHelper,
    queue_helper: QueueHelper,
    connections: Vec<ConnectionDescriptor>,
    tree: EntityTree,
    filtered: EntityTree,
    filter: SearchFilter,
    selection: Selection,
    current_message: Option<Message>,
    events: EventBus,
}

impl Coordinator {
    pub fn new(broker: Arc<dyn BrokerClient>, config: EngineConfig) -> Self {
        Self {
            topic_helper: TopicHelper::new(Arc::clone(&broker), config.clone()),
            queue_helper: QueueHelper::new(broker, config),
            connections: Vec::new(),
            tree: EntityTree::new(),
            filtered: EntityTree::new(),
            filter: SearchFilter::default(),
            selection: Selection::None,
            current_message: None,
            events: EventBus::default(),
        }
    }

    pub fn subscribe(&mut self) -> flume::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Full topology across every open connection. Selection ids refer to
    /// this tree.
    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    /// The subset of [`Coordinator::tree`] matching the current search.
    pub fn filtered_tree(&self) -> &EntityTree {
        &self.filtered
    }

    pub fn filter(&self) -> &SearchFilter {
        &self.filter
    }

    pub fn connections(&self) -> &[ConnectionDescriptor] {
        &self.connections
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn current_message(&self) -> Option<&Message> {
        self.current_message.as_ref()
    }

    pub fn current_collection(&self) -> Option<&MessageCollection> {
        match self.selection.collection()? {
            CollectionRef::Subscription(id) => self.tree.subscription(id).map(|s| &s.collection),
            CollectionRef::Queue(id) => self.tree.queue(id).map(|q| &q.collection),
        }
    }

    /// Locates a topic, subscription or queue by path within one resource.
    pub fn locate(&self, resource: ResourceId, path: &str) -> Option<Selection> {
        match EntityPath::parse(path) {
            EntityPath::Subscription { topic, name } => {
                let topic = self.tree.find_topic(resource, &topic)?;
                let subscription = self.tree.find_subscription(topic, &name)?;
                Some(Selection::Subscription {
                    topic,
                    subscription,
                })
            }
            EntityPath::Queue { name } => self
                .tree
                .find_queue(resource, &name)
                .map(Selection::Queue)
                .or_else(|| self.tree.find_topic(resource, &name).map(Selection::Topic)),
        }
    }

    /// Opens a connection and appends its namespace to the tree.
    ///
    /// A descriptor that is already open is rejected before any broker call.
    pub async fn connect(&mut self, connection: ConnectionDescriptor) -> ServiceBusResult<ResourceId> {
        if self.connections.contains(&connection) {
            let error = ServiceBusError::DuplicateConnection(format!(
                "Connection is already open: {}",
                connection.redacted()
            ));
            self.events.publish(EngineEvent::OperationFailed {
                kind: OperationKind::Connect,
                error: error.clone(),
            });
            return Err(error);
        }

        self.events.publish(EngineEvent::Busy(true));
        let loaded = self.load_snapshot(&connection).await;
        self.events.publish(EngineEvent::Busy(false));

        let snapshot = match loaded {
            Ok(snapshot) => snapshot,
            Err(error) => {
                log::error!("Failed to connect to {}: {error}", connection.redacted());
                self.events.publish(EngineEvent::OperationFailed {
                    kind: OperationKind::Connect,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        log::info!(
            "Connected to namespace '{}' ({} topic(s), {} queue(s))",
            snapshot.name,
            snapshot.topics.len(),
            snapshot.queues.len()
        );
        let resource = self.tree.add_snapshot(&snapshot);
        self.connections.push(connection);
        self.rebuild_filter();
        self.events.publish(EngineEvent::TopologyChanged);
        self.events.publish(EngineEvent::OperationCompleted {
            kind: OperationKind::Connect,
            affected: 1,
        });
        Ok(resource)
    }

    /// Closes a connection and drops its namespace from the tree.
    pub fn disconnect(&mut self, resource: ResourceId) -> ServiceBusResult<()> {
        let connection = self
            .tree
            .resource(resource)
            .map(|r| r.connection.clone())
            .ok_or_else(|| ServiceBusError::EntityNotFound(format!("Resource {resource:?}")))?;

        let key = SelectionKey::of(self.selection, &self.tree);
        let tree = self.tree.without_resource(resource);
        self.connections.retain(|c| c != &connection);
        self.swap_tree(tree, key);
        log::info!("Disconnected {}", connection.redacted());
        Ok(())
    }

    /// Re-lists every open connection, swaps in the new tree and re-fetches
    /// the selected collection's messages.
    pub async fn refresh(&mut self) -> ServiceBusResult<()> {
        self.events.publish(EngineEvent::Busy(true));
        let loaded = {
            let connections = &self.connections;
            try_join_all(connections.iter().map(|c| self.load_snapshot(c))).await
        };

        let snapshots = match loaded {
            Ok(snapshots) => snapshots,
            Err(error) => {
                self.events.publish(EngineEvent::Busy(false));
                log::error!("Refresh failed: {error}");
                self.events.publish(EngineEvent::OperationFailed {
                    kind: OperationKind::Refresh,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        let key = SelectionKey::of(self.selection, &self.tree);
        self.swap_tree(EntityTree::from_snapshots(&snapshots), key);
        self.fetch_messages().await;
        self.events.publish(EngineEvent::Busy(false));
        self.events.publish(EngineEvent::OperationCompleted {
            kind: OperationKind::Refresh,
            affected: snapshots.len() as u64,
        });
        Ok(())
    }

    pub fn set_search(&mut self, text: impl Into<String>, is_regex: bool) {
        self.filter = SearchFilter::new(text, is_regex);
        self.rebuild_filter();
    }

    pub fn select_topic(&mut self, topic: TopicId) -> ServiceBusResult<()> {
        if self.tree.topic(topic).is_none() {
            return Err(ServiceBusError::EntityNotFound(format!("Topic {topic:?}")));
        }
        self.change_selection(Selection::Topic(topic));
        Ok(())
    }

    /// Selects a subscription (and its topic) and fetches its messages.
    pub async fn select_subscription(&mut self, subscription: SubscriptionId) -> ServiceBusResult<()> {
        let topic = self
            .tree
            .subscription(subscription)
            .map(|s| s.topic)
            .ok_or_else(|| ServiceBusError::EntityNotFound(format!("Subscription {subscription:?}")))?;
        self.change_selection(Selection::Subscription {
            topic,
            subscription,
        });
        self.fetch_messages().await;
        Ok(())
    }

    pub async fn select_queue(&mut self, queue: QueueId) -> ServiceBusResult<()> {
        if self.tree.queue(queue).is_none() {
            return Err(ServiceBusError::EntityNotFound(format!("Queue {queue:?}")));
        }
        self.change_selection(Selection::Queue(queue));
        self.fetch_messages().await;
        Ok(())
    }

    /// Applies a selection produced by [`Coordinator::locate`].
    pub async fn select(&mut self, selection: Selection) -> ServiceBusResult<()> {
        match selection {
            Selection::None => {
                self.clear_selection();
                Ok(())
            }
            Selection::Topic(topic) => self.select_topic(topic),
            Selection::Subscription { subscription, .. } => {
                self.select_subscription(subscription).await
            }
            Selection::Queue(queue) => self.select_queue(queue).await,
        }
    }

    pub fn select_message(&mut self, message: Option<Message>) {
        self.current_message = message;
        self.events.publish(EngineEvent::SelectionChanged);
    }

    /// Drops the selection and the pages fetched for it.
    pub fn clear_selection(&mut self) {
        if let Some(collection) = self.selection.collection() {
            if let Some(messages) = self.collection_mut(collection) {
                messages.clear_messages();
            }
            for is_dlq in [false, true] {
                self.events.publish(EngineEvent::MessagesChanged {
                    stream: collection.stream(is_dlq),
                });
            }
        }
        self.selection = Selection::None;
        self.current_message = None;
        self.events.publish(EngineEvent::SelectionChanged);
    }

    /// Refreshes counts and pages for all four streams of the selection.
    ///
    /// Streams are fetched concurrently; a failed runtime-info call is logged
    /// and leaves that stream's counts untouched.
    pub async fn fetch_messages(&mut self) {
        let target = self
            .selection
            .collection()
            .and_then(|c| CollectionTarget::resolve(&self.tree, c));
        let (subscription, queue) = match &target {
            Some(t) if matches!(t.collection, CollectionRef::Subscription(_)) => (Some(t), None),
            Some(t) => (None, Some(t)),
            None => (None, None),
        };

        let (sub_messages, sub_dead_letters, queue_messages, queue_dead_letters) = tokio::join!(
            self.fetch_stream(subscription, false),
            self.fetch_stream(subscription, true),
            self.fetch_stream(queue, false),
            self.fetch_stream(queue, true),
        );

        let Some(target) = target else {
            return;
        };
        for fetched in [sub_messages, sub_dead_letters, queue_messages, queue_dead_letters]
            .into_iter()
            .flatten()
        {
            self.apply_fetch(target.collection, fetched);
        }
    }

    /// Sends a plain-text message to the selected topic or queue.
    /// Blank text is ignored.
    pub async fn send_message(&mut self, text: &str) -> ServiceBusResult<OperationOutcome> {
        if text.trim().is_empty() {
            return Ok(OperationOutcome {
                kind: OperationKind::Send,
                affected: 0,
            });
        }

        let (connection, destination, to_topic) = self.send_destination()?;
        self.events.publish(EngineEvent::Busy(true));
        let result = if to_topic {
            self.topic_helper
                .send_message(&connection, &destination, text)
                .await
        } else {
            self.queue_helper
                .send_message(&connection, &destination, text)
                .await
        };
        let outcome = self.finish(OperationKind::Send, result.map(|()| 1))?;
        self.fetch_messages().await;
        Ok(outcome)
    }

    /// Scan-and-complete delete. See [`SCAN_WARNING`] for the side effect on
    /// messages ahead of the target.
    pub async fn delete_message(&mut self, message: &Message) -> ServiceBusResult<OperationOutcome> {
        let target = self.selected_target()?;
        let outcome = self.run(&target, Lifecycle::Delete(message)).await?;
        if outcome.affected > 0 {
            if let Some(collection) = self.collection_mut(target.collection) {
                collection.remove_message(&message.message_id, message.sequence_number, message.is_dlq);
            }
            if self
                .current_message
                .as_ref()
                .is_some_and(|m| m.sequence_number == message.sequence_number)
            {
                self.current_message = None;
            }
            self.events.publish(EngineEvent::MessagesChanged {
                stream: target.collection.stream(message.is_dlq),
            });
            self.events.publish(EngineEvent::CountsChanged {
                collection: target.collection,
            });
        }
        Ok(outcome)
    }

    pub async fn dead_letter_message(&mut self, message: &Message) -> ServiceBusResult<OperationOutcome> {
        let target = self.selected_target()?;
        let outcome = self.run(&target, Lifecycle::DeadLetter(message)).await?;
        self.fetch_messages().await;
        Ok(outcome)
    }

    pub async fn resubmit_dlq_message(&mut self, message: &Message) -> ServiceBusResult<OperationOutcome> {
        let target = self.selected_target()?;
        let outcome = self.run(&target, Lifecycle::Resubmit(message)).await?;
        self.fetch_messages().await;
        Ok(outcome)
    }

    /// Empties the main or dead-letter side of the selected collection.
    pub async fn purge(&mut self, is_dlq: bool) -> ServiceBusResult<OperationOutcome> {
        let target = self.selected_target()?;
        let outcome = self.run(&target, Lifecycle::Purge(is_dlq)).await?;
        if let Some(collection) = self.collection_mut(target.collection) {
            collection.reset(is_dlq);
        }
        self.events.publish(EngineEvent::CountsChanged {
            collection: target.collection,
        });
        self.fetch_messages().await;
        Ok(outcome)
    }

    pub async fn transfer_dlq(&mut self) -> ServiceBusResult<OperationOutcome> {
        let target = self.selected_target()?;
        let outcome = self.run(&target, Lifecycle::Transfer).await?;
        self.fetch_messages().await;
        Ok(outcome)
    }

    pub fn tab_headers(&self) -> TabHeaders {
        let (messages, dead_letters) = self
            .current_collection()
            .map(|c| (c.message_count, c.dlq_count))
            .unwrap_or_default();
        TabHeaders {
            messages: format!("Messages ({messages})"),
            dead_letters: format!("Dead-letter ({dead_letters})"),
            topics: format!("Topics ({})", self.tree.topic_count()),
            queues: format!("Queues ({})", self.tree.queue_count()),
        }
    }

    async fn load_snapshot(&self, connection: &ConnectionDescriptor) -> ServiceBusResult<ResourceSnapshot> {
        let (namespace, topics, queues) = tokio::try_join!(
            self.topic_helper.get_namespace_info(connection),
            self.topic_helper.list_topology(connection),
            self.queue_helper.list_queues(connection),
        )?;
        Ok(ResourceSnapshot {
            name: namespace.name,
            created_at: namespace.created_at,
            connection: connection.clone(),
            topics,
            queues,
        })
    }

    fn rebuild_filter(&mut self) {
        self.filtered = filter_tree(&self.tree, &self.filter);
        self.events.publish(EngineEvent::FilterChanged);
    }

    fn swap_tree(&mut self, tree: EntityTree, key: Option<SelectionKey>) {
        self.tree = tree;
        self.selection = key.map(|k| k.resolve(&self.tree)).unwrap_or_default();
        self.current_message = None;
        self.rebuild_filter();
        self.events.publish(EngineEvent::TopologyChanged);
        self.events.publish(EngineEvent::SelectionChanged);
    }

    fn change_selection(&mut self, selection: Selection) {
        if let Some(previous) = self.selection.collection() {
            if Some(previous) != selection.collection() {
                if let Some(collection) = self.collection_mut(previous) {
                    collection.clear_messages();
                }
            }
        }
        self.selection = selection;
        self.current_message = None;
        self.events.publish(EngineEvent::SelectionChanged);
    }

    fn collection_mut(&mut self, collection: CollectionRef) -> Option<&mut MessageCollection> {
        match collection {
            CollectionRef::Subscription(id) => {
                self.tree.subscription_mut(id).map(|s| &mut s.collection)
            }
            CollectionRef::Queue(id) => self.tree.queue_mut(id).map(|q| &mut q.collection),
        }
    }

    fn selected_target(&self) -> ServiceBusResult<CollectionTarget> {
        self.selection
            .collection()
            .and_then(|c| CollectionTarget::resolve(&self.tree, c))
            .ok_or_else(|| {
                ServiceBusError::NothingSelected(
                    "Select a subscription or queue first".to_string(),
                )
            })
    }

    /// Connection, destination name and whether it is a topic.
    fn send_destination(&self) -> ServiceBusResult<(ConnectionDescriptor, String, bool)> {
        let nothing = || ServiceBusError::NothingSelected("Select a topic or queue first".to_string());
        if let Some(topic) = self.selection.topic() {
            let resource = self.tree.resource_of_topic(topic).ok_or_else(nothing)?;
            let topic = self.tree.topic(topic).ok_or_else(nothing)?;
            return Ok((resource.connection.clone(), topic.name.clone(), true));
        }
        let target = self.selected_target().map_err(|_| nothing())?;
        Ok((target.connection, target.path.send_path().to_string(), false))
    }

    async fn fetch_stream(&self, target: Option<&CollectionTarget>, is_dlq: bool) -> Option<StreamFetch> {
        let target = target?;
        let connection = &target.connection;

        let (runtime, messages) = match &target.path {
            EntityPath::Subscription { topic, name } => (
                self.topic_helper
                    .get_subscription_runtime_info(connection, topic, name)
                    .await,
                self.topic_helper
                    .peek_subscription_messages(connection, topic, name, is_dlq)
                    .await,
            ),
            EntityPath::Queue { name } => (
                self.queue_helper.get_queue_runtime_info(connection, name).await,
                self.queue_helper.peek_messages(connection, name, is_dlq).await,
            ),
        };

        let runtime = match runtime {
            Ok(runtime) => Some(runtime),
            Err(error) => {
                log::warn!(
                    "Failed to refresh counts for {}: {error}",
                    target.path.receive_path()
                );
                None
            }
        };

        Some(StreamFetch {
            stream: target.collection.stream(is_dlq),
            runtime,
            messages,
        })
    }

    fn apply_fetch(&mut self, collection: CollectionRef, fetched: StreamFetch) {
        let Some(messages) = self.collection_mut(collection) else {
            return;
        };
        if let Some(runtime) = fetched.runtime {
            messages.apply_runtime(runtime);
        }
        messages.replace_messages(fetched.stream.is_dead_letter(), fetched.messages);
        self.events.publish(EngineEvent::MessagesChanged {
            stream: fetched.stream,
        });
        self.events.publish(EngineEvent::CountsChanged { collection });
    }

    async fn run(&mut self, target: &CollectionTarget, op: Lifecycle<'_>) -> ServiceBusResult<OperationOutcome> {
        let kind = op.kind();
        self.events.publish(EngineEvent::Busy(true));
        let result = self.dispatch(target, op).await;
        self.finish(kind, result)
    }

    async fn dispatch(&self, target: &CollectionTarget, op: Lifecycle<'_>) -> ServiceBusResult<u64> {
        let connection = &target.connection;
        match (&target.path, op) {
            (EntityPath::Subscription { topic, name }, op) => {
                let topics = &self.topic_helper;
                match op {
                    Lifecycle::Delete(m) => {
                        topics.delete_message(connection, topic, name, m, m.is_dlq).await
                    }
                    Lifecycle::DeadLetter(m) => {
                        topics.dead_letter_message(connection, topic, name, m).await
                    }
                    Lifecycle::Resubmit(m) => {
                        topics.resubmit_dlq_message(connection, topic, name, m).await
                    }
                    Lifecycle::Purge(is_dlq) => {
                        topics.purge_messages(connection, topic, name, is_dlq).await
                    }
                    Lifecycle::Transfer => topics.transfer_dlq_messages(connection, topic, name).await,
                }
            }
            (EntityPath::Queue { name }, op) => {
                let queues = &self.queue_helper;
                match op {
                    Lifecycle::Delete(m) => queues.delete_message(connection, name, m, m.is_dlq).await,
                    Lifecycle::DeadLetter(m) => queues.dead_letter_message(connection, name, m).await,
                    Lifecycle::Resubmit(m) => queues.resubmit_dlq_message(connection, name, m).await,
                    Lifecycle::Purge(is_dlq) => queues.purge_messages(connection, name, is_dlq).await,
                    Lifecycle::Transfer => queues.transfer_dlq_messages(connection, name).await,
                }
            }
        }
    }

    fn finish(&mut self, kind: OperationKind, result: ServiceBusResult<u64>) -> ServiceBusResult<OperationOutcome> {
        self.events.publish(EngineEvent::Busy(false));
        match result {
            Ok(affected) => {
                log::info!("{kind} affected {affected} message(s)");
                self.events
                    .publish(EngineEvent::Log(format!("{kind}: {affected} message(s)")));
                self.events
                    .publish(EngineEvent::OperationCompleted { kind, affected });
                Ok(OperationOutcome { kind, affected })
            }
            Err(error) => {
                log::error!("{kind} failed: {error}");
                self.events.publish(EngineEvent::OperationFailed {
                    kind,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }
}
