//! Transport seam between the engine and a Service Bus namespace.
//!
//! The engine only ever talks to these traits. Handles are created per
//! operation and disposed by the caller before the operation returns; none
//! is pooled or shared between concurrent operations.
//!
//! Two implementations ship with the crate:
//!
//! - [`azure::AzureBrokerClient`]: data plane through `azservicebus`,
//!   management plane through the Azure Resource Manager REST API.
//! - [`memory::InMemoryBroker`]: a process-local broker with the same
//!   settlement semantics, used by the integration tests and demo mode.

pub mod azure;
pub mod memory;
pub mod types;

pub use types::{
    DEAD_LETTER_ERROR_DESCRIPTION_PROPERTY, DEAD_LETTER_REASON_PROPERTY, DeadLetterOptions,
    NamespaceProperties, OutgoingMessage, Page, PropertyValue, QueueProperties, ReceiveMode,
    ReceivedMessage, RuntimeInfo, SubscriptionProperties, TopicProperties,
};

use crate::common::ServiceBusResult;
use crate::model::ConnectionDescriptor;
use async_trait::async_trait;
use std::time::Duration;

/// Factory for scoped management, receiver and sender handles.
///
/// Connection-level failures (malformed connection string, rejected
/// credentials, unreachable namespace) surface from these calls.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn management(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<Box<dyn ManagementClient>>;

    async fn create_receiver(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
        mode: ReceiveMode,
    ) -> ServiceBusResult<Box<dyn MessageReceiver>>;

    async fn create_sender(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
    ) -> ServiceBusResult<Box<dyn MessageSender>>;
}

/// Read-only discovery surface. Listing calls are paginated server-side;
/// pass the previous page's continuation to get the next one.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn namespace_properties(&self) -> ServiceBusResult<NamespaceProperties>;

    async fn list_topics(
        &self,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<TopicProperties>>;

    async fn list_subscriptions(
        &self,
        topic: &str,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<SubscriptionProperties>>;

    async fn list_queues(
        &self,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<QueueProperties>>;

    async fn topic(&self, path: &str) -> ServiceBusResult<TopicProperties>;

    async fn subscription_runtime(
        &self,
        topic: &str,
        name: &str,
    ) -> ServiceBusResult<SubscriptionProperties>;

    async fn queue_runtime(&self, path: &str) -> ServiceBusResult<QueueProperties>;
}

#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Non-destructive browse starting at `from_sequence`, or at the front
    /// of the entity when `None`.
    async fn peek_messages(
        &mut self,
        max_count: u32,
        from_sequence: Option<i64>,
    ) -> ServiceBusResult<Vec<ReceivedMessage>>;

    /// Receives up to `max_count` messages. With `max_wait` set, an elapsed
    /// wait yields an empty batch instead of an error.
    async fn receive_messages(
        &mut self,
        max_count: u32,
        max_wait: Option<Duration>,
    ) -> ServiceBusResult<Vec<ReceivedMessage>>;

    async fn complete_message(&mut self, message: &ReceivedMessage) -> ServiceBusResult<()>;

    async fn dead_letter_message(
        &mut self,
        message: &ReceivedMessage,
        options: DeadLetterOptions,
    ) -> ServiceBusResult<()>;

    /// Releases the receiver. Unsettled locks are returned to the entity.
    async fn dispose(&mut self) -> ServiceBusResult<()>;
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&mut self, message: OutgoingMessage) -> ServiceBusResult<()>;

    async fn send_messages(&mut self, messages: Vec<OutgoingMessage>) -> ServiceBusResult<()>;

    async fn dispose(&mut self) -> ServiceBusResult<()>;
}
