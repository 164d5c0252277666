//! Process-local broker with Service Bus settlement semantics.
//!
//! - Sequence numbers increase monotonically per entity and survive
//!   dead-lettering.
//! - A peek-lock receive increments the delivery count and locks the message
//!   until it is completed, dead-lettered or the receiver is disposed.
//!   Released messages keep their original position.
//! - Receive-and-delete removes on delivery.
//! - Sending to a topic fans out to every subscription.
//! - Management listings are paginated with a fixed page size.
//!
//! Every handle creation counts as a network call, so callers can assert that
//! an operation was rejected before touching the broker.

use super::{
    BrokerClient, DEAD_LETTER_ERROR_DESCRIPTION_PROPERTY, DEAD_LETTER_REASON_PROPERTY,
    DeadLetterOptions, ManagementClient, MessageReceiver, MessageSender, NamespaceProperties,
    OutgoingMessage, Page, QueueProperties, ReceiveMode, ReceivedMessage, RuntimeInfo,
    SubscriptionProperties, TopicProperties,
};
use crate::common::{ServiceBusError, ServiceBusResult};
use crate::model::{ConnectionDescriptor, ConnectionString, EntityPath, split_dead_letter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct StoredMessage {
    message: ReceivedMessage,
    locked_by: Option<Uuid>,
}

#[derive(Debug, Default)]
struct EntityState {
    active: Vec<StoredMessage>,
    dead_letter: Vec<StoredMessage>,
    next_sequence: i64,
}

impl EntityState {
    fn store(&mut self, message: OutgoingMessage) -> i64 {
        self.next_sequence += 1;
        let sequence_number = self.next_sequence;
        let message = ReceivedMessage {
            message_id: Some(
                message
                    .message_id
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            ),
            correlation_id: message.correlation_id,
            content_type: message.content_type,
            subject: message.subject,
            to: message.to,
            session_id: message.session_id,
            partition_key: message.partition_key,
            reply_to: message.reply_to,
            reply_to_session_id: message.reply_to_session_id,
            transaction_partition_key: message.transaction_partition_key,
            body: message.body,
            delivery_count: 0,
            sequence_number,
            time_to_live: message.time_to_live,
            enqueued_time: Some(Utc::now()),
            application_properties: message.application_properties,
            dead_letter_reason: None,
            dead_letter_error_description: None,
            lock_token: None,
        };
        self.active.push(StoredMessage {
            message,
            locked_by: None,
        });
        sequence_number
    }

    fn queue(&mut self, dead_letter: bool) -> &mut Vec<StoredMessage> {
        if dead_letter {
            &mut self.dead_letter
        } else {
            &mut self.active
        }
    }

    fn runtime(&self) -> RuntimeInfo {
        RuntimeInfo {
            message_count: self.active.len() as u64,
            dlq_count: self.dead_letter.len() as u64,
        }
    }
}

#[derive(Debug)]
struct NamespaceState {
    created_at: DateTime<Utc>,
    /// Topic name to its subscription names, in creation order
    topics: Vec<(String, Vec<String>)>,
    queues: Vec<String>,
    /// Keyed by receive path (queue name or `topic/Subscriptions/name`)
    entities: HashMap<String, EntityState>,
}

impl NamespaceState {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            topics: Vec::new(),
            queues: Vec::new(),
            entities: HashMap::new(),
        }
    }

    fn entity(&mut self, receive_path: &str) -> ServiceBusResult<&mut EntityState> {
        self.entities
            .get_mut(receive_path)
            .ok_or_else(|| ServiceBusError::EntityNotFound(receive_path.to_string()))
    }

    fn subscriptions_of(&self, topic: &str) -> Option<&Vec<String>> {
        self.topics
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, subs)| subs)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    namespaces: HashMap<String, NamespaceState>,
    rejected_credentials: HashSet<String>,
    peek_failures: HashSet<String>,
    receive_failures: HashSet<String>,
    send_failures: HashSet<String>,
    runtime_failures: HashSet<String>,
}

type SharedState = Arc<Mutex<BrokerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`BrokerClient`] with test seeding and failure injection.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: SharedState,
    page_size: usize,
    calls: Arc<AtomicUsize>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            page_size: DEFAULT_PAGE_SIZE,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Server-side page size of management listings.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Creates a namespace and returns a shared-key connection for it.
    pub fn create_namespace(&self, name: &str) -> ConnectionDescriptor {
        lock(&self.state)
            .namespaces
            .entry(name.to_string())
            .or_insert_with(NamespaceState::new);
        ConnectionDescriptor::new(
            format!(
                "Endpoint=sb://{name}.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=bG9jYWw="
            ),
            false,
        )
    }

    pub fn create_queue(&self, namespace: &str, queue: &str) {
        let mut state = lock(&self.state);
        let ns = state
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(NamespaceState::new);
        if !ns.queues.iter().any(|q| q == queue) {
            ns.queues.push(queue.to_string());
            ns.entities.insert(queue.to_string(), EntityState::default());
        }
    }

    pub fn create_topic(&self, namespace: &str, topic: &str) {
        let mut state = lock(&self.state);
        let ns = state
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(NamespaceState::new);
        if ns.subscriptions_of(topic).is_none() {
            ns.topics.push((topic.to_string(), Vec::new()));
        }
    }

    pub fn create_subscription(&self, namespace: &str, topic: &str, subscription: &str) {
        self.create_topic(namespace, topic);
        let mut state = lock(&self.state);
        let Some(ns) = state.namespaces.get_mut(namespace) else {
            return;
        };
        if let Some((_, subs)) = ns.topics.iter_mut().find(|(name, _)| name == topic) {
            if !subs.iter().any(|s| s == subscription) {
                subs.push(subscription.to_string());
                ns.entities.insert(
                    EntityPath::subscription(topic, subscription).receive_path(),
                    EntityState::default(),
                );
            }
        }
    }

    /// Sends without going through a sender handle and without counting a
    /// call. Returns the sequence numbers assigned, one per receiving entity.
    pub fn seed(
        &self,
        namespace: &str,
        send_path: &str,
        message: OutgoingMessage,
    ) -> ServiceBusResult<Vec<i64>> {
        let mut state = lock(&self.state);
        deliver(&mut state, namespace, send_path, message)
    }

    /// Places a message directly in an entity's dead-letter sub-queue.
    pub fn seed_dead_letter(
        &self,
        namespace: &str,
        receive_path: &str,
        message: OutgoingMessage,
        reason: &str,
    ) -> ServiceBusResult<i64> {
        let mut state = lock(&self.state);
        let ns = namespace_mut(&mut state, namespace)?;
        let entity = ns.entity(receive_path)?;
        let sequence = entity.store(message);
        if let Some(mut stored) = entity.active.pop() {
            stamp_dead_letter(
                &mut stored.message,
                &DeadLetterOptions {
                    reason: Some(reason.to_string()),
                    error_description: None,
                },
            );
            entity.dead_letter.push(stored);
        }
        Ok(sequence)
    }

    /// Snapshot of the active messages of an entity, bypassing call counting.
    pub fn active_messages(&self, namespace: &str, receive_path: &str) -> Vec<ReceivedMessage> {
        self.snapshot(namespace, receive_path, false)
    }

    pub fn dead_letter_messages(&self, namespace: &str, receive_path: &str) -> Vec<ReceivedMessage> {
        self.snapshot(namespace, receive_path, true)
    }

    fn snapshot(&self, namespace: &str, receive_path: &str, dead_letter: bool) -> Vec<ReceivedMessage> {
        let mut state = lock(&self.state);
        namespace_mut(&mut state, namespace)
            .and_then(|ns| ns.entity(receive_path))
            .map(|entity| {
                entity
                    .queue(dead_letter)
                    .iter()
                    .map(|stored| stored.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Makes every handle creation for this connection string fail as unauthorized.
    pub fn reject_credentials(&self, connection_string: &str) {
        lock(&self.state)
            .rejected_credentials
            .insert(connection_string.to_string());
    }

    pub fn fail_peek_on(&self, path: &str) {
        lock(&self.state).peek_failures.insert(path.to_string());
    }

    pub fn fail_receive_on(&self, path: &str) {
        lock(&self.state).receive_failures.insert(path.to_string());
    }

    pub fn fail_send_on(&self, path: &str) {
        lock(&self.state).send_failures.insert(path.to_string());
    }

    /// Makes runtime-info lookups for a receive path fail.
    pub fn fail_runtime_on(&self, path: &str) {
        lock(&self.state).runtime_failures.insert(path.to_string());
    }

    /// Number of handles created so far (management, receiver or sender).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn open(&self, connection: &ConnectionDescriptor) -> ServiceBusResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let parsed = ConnectionString::parse(connection)?;
        let state = lock(&self.state);
        if state
            .rejected_credentials
            .contains(&connection.connection_string)
        {
            return Err(ServiceBusError::Unauthorized(format!(
                "Unauthorized access to '{}'",
                parsed.namespace
            )));
        }
        if !state.namespaces.contains_key(&parsed.namespace) {
            return Err(ServiceBusError::ConnectionFailed(format!(
                "No such host is known: {}",
                parsed.host()
            )));
        }
        Ok(parsed.namespace)
    }
}

fn namespace_mut<'a>(
    state: &'a mut BrokerState,
    namespace: &str,
) -> ServiceBusResult<&'a mut NamespaceState> {
    state
        .namespaces
        .get_mut(namespace)
        .ok_or_else(|| ServiceBusError::ConnectionFailed(format!("Unknown namespace {namespace}")))
}

fn deliver(
    state: &mut BrokerState,
    namespace: &str,
    send_path: &str,
    message: OutgoingMessage,
) -> ServiceBusResult<Vec<i64>> {
    if split_dead_letter(send_path).1 {
        return Err(ServiceBusError::MessageSendFailed(format!(
            "Cannot send to dead-letter sub-queue {send_path}"
        )));
    }
    let ns = namespace_mut(state, namespace)?;

    if let Some(subscriptions) = ns.subscriptions_of(send_path).cloned() {
        let mut sequences = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let path = EntityPath::subscription(send_path, subscription).receive_path();
            sequences.push(ns.entity(&path)?.store(message.clone()));
        }
        return Ok(sequences);
    }

    if ns.queues.iter().any(|q| q == send_path) {
        return Ok(vec![ns.entity(send_path)?.store(message)]);
    }

    Err(ServiceBusError::EntityNotFound(send_path.to_string()))
}

fn stamp_dead_letter(message: &mut ReceivedMessage, options: &DeadLetterOptions) {
    message.lock_token = None;
    message.dead_letter_reason = options.reason.clone();
    message.dead_letter_error_description = options.error_description.clone();
    if let Some(reason) = &options.reason {
        message
            .application_properties
            .insert(DEAD_LETTER_REASON_PROPERTY.to_string(), reason.as_str().into());
    }
    if let Some(description) = &options.error_description {
        message.application_properties.insert(
            DEAD_LETTER_ERROR_DESCRIPTION_PROPERTY.to_string(),
            description.as_str().into(),
        );
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn management(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<Box<dyn ManagementClient>> {
        let namespace = self.open(connection)?;
        Ok(Box::new(InMemoryManagement {
            state: Arc::clone(&self.state),
            namespace,
            page_size: self.page_size,
        }))
    }

    async fn create_receiver(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
        mode: ReceiveMode,
    ) -> ServiceBusResult<Box<dyn MessageReceiver>> {
        let namespace = self.open(connection)?;
        let (entity_path, dead_letter) = split_dead_letter(path);
        {
            let mut state = lock(&self.state);
            namespace_mut(&mut state, &namespace)?.entity(entity_path)?;
        }
        Ok(Box::new(InMemoryReceiver {
            state: Arc::clone(&self.state),
            namespace,
            path: path.to_string(),
            entity_path: entity_path.to_string(),
            dead_letter,
            mode,
            id: Uuid::new_v4(),
            disposed: false,
        }))
    }

    async fn create_sender(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
    ) -> ServiceBusResult<Box<dyn MessageSender>> {
        let namespace = self.open(connection)?;
        Ok(Box::new(InMemorySender {
            state: Arc::clone(&self.state),
            namespace,
            path: path.to_string(),
            disposed: false,
        }))
    }
}

struct InMemoryManagement {
    state: SharedState,
    namespace: String,
    page_size: usize,
}

impl InMemoryManagement {
    fn paginate<T: Clone>(&self, items: &[T], continuation: Option<String>) -> ServiceBusResult<Page<T>> {
        let start = match continuation {
            Some(token) => token.parse::<usize>().map_err(|_| {
                ServiceBusError::ManagementFailed(format!("Invalid continuation token '{token}'"))
            })?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        let page = items.get(start..end).unwrap_or_default().to_vec();
        let continuation = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: page,
            continuation,
        })
    }

    fn runtime(&self, receive_path: &str) -> ServiceBusResult<RuntimeInfo> {
        let mut state = lock(&self.state);
        if state.runtime_failures.contains(receive_path) {
            return Err(ServiceBusError::ManagementFailed(format!(
                "Runtime information unavailable for {receive_path}"
            )));
        }
        Ok(namespace_mut(&mut state, &self.namespace)?
            .entity(receive_path)?
            .runtime())
    }
}

#[async_trait]
impl ManagementClient for InMemoryManagement {
    async fn namespace_properties(&self) -> ServiceBusResult<NamespaceProperties> {
        let mut state = lock(&self.state);
        let ns = namespace_mut(&mut state, &self.namespace)?;
        Ok(NamespaceProperties {
            name: self.namespace.clone(),
            created_at: ns.created_at,
        })
    }

    async fn list_topics(
        &self,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<TopicProperties>> {
        let topics: Vec<TopicProperties> = {
            let mut state = lock(&self.state);
            namespace_mut(&mut state, &self.namespace)?
                .topics
                .iter()
                .map(|(name, _)| TopicProperties { name: name.clone() })
                .collect()
        };
        self.paginate(&topics, continuation)
    }

    async fn list_subscriptions(
        &self,
        topic: &str,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<SubscriptionProperties>> {
        let names = {
            let mut state = lock(&self.state);
            namespace_mut(&mut state, &self.namespace)?
                .subscriptions_of(topic)
                .cloned()
                .ok_or_else(|| ServiceBusError::EntityNotFound(topic.to_string()))?
        };
        let mut subscriptions = Vec::with_capacity(names.len());
        for name in names {
            let path = EntityPath::subscription(topic, name.as_str()).receive_path();
            subscriptions.push(SubscriptionProperties {
                topic_name: topic.to_string(),
                name,
                runtime: self.runtime(&path)?,
            });
        }
        self.paginate(&subscriptions, continuation)
    }

    async fn list_queues(
        &self,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<QueueProperties>> {
        let names = {
            let mut state = lock(&self.state);
            namespace_mut(&mut state, &self.namespace)?.queues.clone()
        };
        let mut queues = Vec::with_capacity(names.len());
        for name in names {
            let runtime = self.runtime(&name)?;
            queues.push(QueueProperties { name, runtime });
        }
        self.paginate(&queues, continuation)
    }

    async fn topic(&self, path: &str) -> ServiceBusResult<TopicProperties> {
        let mut state = lock(&self.state);
        namespace_mut(&mut state, &self.namespace)?
            .subscriptions_of(path)
            .map(|_| TopicProperties {
                name: path.to_string(),
            })
            .ok_or_else(|| ServiceBusError::EntityNotFound(path.to_string()))
    }

    async fn subscription_runtime(
        &self,
        topic: &str,
        name: &str,
    ) -> ServiceBusResult<SubscriptionProperties> {
        let path = EntityPath::subscription(topic, name).receive_path();
        Ok(SubscriptionProperties {
            topic_name: topic.to_string(),
            name: name.to_string(),
            runtime: self.runtime(&path)?,
        })
    }

    async fn queue_runtime(&self, path: &str) -> ServiceBusResult<QueueProperties> {
        Ok(QueueProperties {
            name: path.to_string(),
            runtime: self.runtime(path)?,
        })
    }
}

struct InMemoryReceiver {
    state: SharedState,
    namespace: String,
    path: String,
    entity_path: String,
    dead_letter: bool,
    mode: ReceiveMode,
    id: Uuid,
    disposed: bool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> ServiceBusResult<()> {
        if self.disposed {
            return Err(ServiceBusError::InternalError(
                "Receiver already disposed".to_string(),
            ));
        }
        Ok(())
    }

    /// Removes the message locked by this receiver under `message`'s lock token.
    fn take_locked(
        &self,
        state: &mut BrokerState,
        message: &ReceivedMessage,
    ) -> Option<StoredMessage> {
        let token = message.lock_token?;
        let entity = namespace_mut(state, &self.namespace)
            .ok()?
            .entity(&self.entity_path)
            .ok()?;
        let queue = entity.queue(self.dead_letter);
        let index = queue.iter().position(|stored| {
            stored.locked_by == Some(self.id) && stored.message.lock_token == Some(token)
        })?;
        Some(queue.remove(index))
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn peek_messages(
        &mut self,
        max_count: u32,
        from_sequence: Option<i64>,
    ) -> ServiceBusResult<Vec<ReceivedMessage>> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if state.peek_failures.contains(&self.path) {
            return Err(ServiceBusError::MessageReceiveFailed(format!(
                "Peek failed on {}",
                self.path
            )));
        }
        let from = from_sequence.unwrap_or(i64::MIN);
        let entity = namespace_mut(&mut state, &self.namespace)?.entity(&self.entity_path)?;
        Ok(entity
            .queue(self.dead_letter)
            .iter()
            .filter(|stored| stored.message.sequence_number >= from)
            .take(max_count as usize)
            .map(|stored| ReceivedMessage {
                lock_token: None,
                ..stored.message.clone()
            })
            .collect())
    }

    async fn receive_messages(
        &mut self,
        max_count: u32,
        _max_wait: Option<Duration>,
    ) -> ServiceBusResult<Vec<ReceivedMessage>> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if state.receive_failures.contains(&self.path) {
            return Err(ServiceBusError::MessageReceiveFailed(format!(
                "Receive failed on {}",
                self.path
            )));
        }
        let mode = self.mode;
        let receiver_id = self.id;
        let entity = namespace_mut(&mut state, &self.namespace)?.entity(&self.entity_path)?;
        let queue = entity.queue(self.dead_letter);

        match mode {
            ReceiveMode::PeekOnly => Err(ServiceBusError::MessageReceiveFailed(
                "Receiver was opened for peeking only".to_string(),
            )),
            ReceiveMode::PeekLock => {
                let mut received = Vec::new();
                for stored in queue
                    .iter_mut()
                    .filter(|stored| stored.locked_by.is_none())
                    .take(max_count as usize)
                {
                    stored.locked_by = Some(receiver_id);
                    stored.message.delivery_count += 1;
                    stored.message.lock_token = Some(Uuid::new_v4());
                    received.push(stored.message.clone());
                }
                Ok(received)
            }
            ReceiveMode::ReceiveAndDelete => {
                let mut received = Vec::new();
                let mut index = 0;
                while index < queue.len() && received.len() < max_count as usize {
                    if queue[index].locked_by.is_none() {
                        let mut stored = queue.remove(index);
                        stored.message.delivery_count += 1;
                        received.push(stored.message);
                    } else {
                        index += 1;
                    }
                }
                Ok(received)
            }
        }
    }

    async fn complete_message(&mut self, message: &ReceivedMessage) -> ServiceBusResult<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        self.take_locked(&mut state, message)
            .map(|_| ())
            .ok_or_else(|| {
                ServiceBusError::MessageCompleteFailed(format!(
                    "The lock supplied is invalid for message {:?}",
                    message.message_id
                ))
            })
    }

    async fn dead_letter_message(
        &mut self,
        message: &ReceivedMessage,
        options: DeadLetterOptions,
    ) -> ServiceBusResult<()> {
        self.ensure_open()?;
        if self.dead_letter {
            return Err(ServiceBusError::MessageDeadLetterFailed(format!(
                "{} is already a dead-letter sub-queue",
                self.path
            )));
        }
        let mut state = lock(&self.state);
        let mut stored = self.take_locked(&mut state, message).ok_or_else(|| {
            ServiceBusError::MessageDeadLetterFailed(format!(
                "The lock supplied is invalid for message {:?}",
                message.message_id
            ))
        })?;
        stored.locked_by = None;
        stamp_dead_letter(&mut stored.message, &options);
        namespace_mut(&mut state, &self.namespace)?
            .entity(&self.entity_path)?
            .dead_letter
            .push(stored);
        Ok(())
    }

    async fn dispose(&mut self) -> ServiceBusResult<()> {
        self.ensure_open()?;
        self.disposed = true;
        let mut state = lock(&self.state);
        if let Ok(entity) =
            namespace_mut(&mut state, &self.namespace).and_then(|ns| ns.entity(&self.entity_path))
        {
            for stored in entity
                .queue(self.dead_letter)
                .iter_mut()
                .filter(|stored| stored.locked_by == Some(self.id))
            {
                stored.locked_by = None;
                stored.message.lock_token = None;
            }
        }
        Ok(())
    }
}

struct InMemorySender {
    state: SharedState,
    namespace: String,
    path: String,
    disposed: bool,
}

impl InMemorySender {
    fn send_all(&self, messages: Vec<OutgoingMessage>) -> ServiceBusResult<()> {
        if self.disposed {
            return Err(ServiceBusError::InternalError(
                "Sender already disposed".to_string(),
            ));
        }
        let mut state = lock(&self.state);
        if state.send_failures.contains(&self.path) {
            return Err(ServiceBusError::MessageSendFailed(format!(
                "Send failed on {}",
                self.path
            )));
        }
        for message in messages {
            deliver(&mut state, &self.namespace, &self.path, message)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send_message(&mut self, message: OutgoingMessage) -> ServiceBusResult<()> {
        self.send_all(vec![message])
    }

    async fn send_messages(&mut self, messages: Vec<OutgoingMessage>) -> ServiceBusResult<()> {
        self.send_all(messages)
    }

    async fn dispose(&mut self) -> ServiceBusResult<()> {
        self.disposed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with_queue() -> (InMemoryBroker, ConnectionDescriptor) {
        let broker = InMemoryBroker::new();
        let connection = broker.create_namespace("ns");
        broker.create_queue("ns", "orders");
        (broker, connection)
    }

    #[tokio::test]
    async fn peek_lock_locks_until_dispose_and_keeps_order() {
        let (broker, connection) = broker_with_queue();
        for i in 0..3 {
            broker
                .seed("ns", "orders", OutgoingMessage::from_text(&format!("m{i}")))
                .unwrap();
        }

        let mut receiver = broker
            .create_receiver(&connection, "orders", ReceiveMode::PeekLock)
            .await
            .unwrap();
        let first = receiver.receive_messages(2, None).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = receiver.receive_messages(2, None).await.unwrap();
        assert_eq!(second.len(), 1);
        receiver.dispose().await.unwrap();

        let remaining = broker.active_messages("ns", "orders");
        let bodies: Vec<_> = remaining.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec()]);
        assert!(remaining.iter().all(|m| m.delivery_count == 1));
    }

    #[tokio::test]
    async fn dead_letter_stamps_reason_and_keeps_sequence() {
        let (broker, connection) = broker_with_queue();
        let seq = broker
            .seed("ns", "orders", OutgoingMessage::from_text("bad"))
            .unwrap()[0];

        let mut receiver = broker
            .create_receiver(&connection, "orders", ReceiveMode::PeekLock)
            .await
            .unwrap();
        let batch = receiver.receive_messages(10, None).await.unwrap();
        receiver
            .dead_letter_message(
                &batch[0],
                DeadLetterOptions {
                    reason: Some("Poison".into()),
                    error_description: None,
                },
            )
            .await
            .unwrap();
        receiver.dispose().await.unwrap();

        assert!(broker.active_messages("ns", "orders").is_empty());
        let dlq = broker.dead_letter_messages("ns", "orders");
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].sequence_number, seq);
        assert_eq!(dlq[0].dead_letter_reason.as_deref(), Some("Poison"));
        assert_eq!(
            dlq[0]
                .application_properties
                .get(DEAD_LETTER_REASON_PROPERTY)
                .and_then(|v| v.as_str()),
            Some("Poison")
        );
    }

    #[tokio::test]
    async fn topic_send_fans_out_to_subscriptions() {
        let broker = InMemoryBroker::new();
        let connection = broker.create_namespace("ns");
        broker.create_subscription("ns", "events", "audit");
        broker.create_subscription("ns", "events", "billing");

        let mut sender = broker.create_sender(&connection, "events").await.unwrap();
        sender
            .send_message(OutgoingMessage::from_text("hello"))
            .await
            .unwrap();
        sender.dispose().await.unwrap();

        assert_eq!(broker.active_messages("ns", "events/Subscriptions/audit").len(), 1);
        assert_eq!(broker.active_messages("ns", "events/Subscriptions/billing").len(), 1);
    }

    #[tokio::test]
    async fn listing_is_paginated() {
        let broker = InMemoryBroker::new().with_page_size(2);
        let connection = broker.create_namespace("ns");
        for name in ["a", "b", "c"] {
            broker.create_queue("ns", name);
        }

        let management = broker.management(&connection).await.unwrap();
        let first = management.list_queues(None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = management.list_queues(first.continuation).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.continuation.is_none());
    }

    #[tokio::test]
    async fn rejected_credentials_are_unauthorized() {
        let (broker, connection) = broker_with_queue();
        broker.reject_credentials(&connection.connection_string);
        let err = broker.management(&connection).await.err().unwrap();
        assert!(matches!(err, ServiceBusError::Unauthorized(_)));
        assert_eq!(broker.call_count(), 1);
    }

    #[tokio::test]
    async fn disposed_receiver_rejects_calls() {
        let (broker, connection) = broker_with_queue();
        let mut receiver = broker
            .create_receiver(&connection, "orders", ReceiveMode::PeekOnly)
            .await
            .unwrap();
        receiver.dispose().await.unwrap();
        assert!(receiver.peek_messages(1, None).await.is_err());
    }
}
