use super::{EntityOperations, collect_capped};
use crate::broker::{BrokerClient, OutgoingMessage, RuntimeInfo};
use crate::common::ServiceBusResult;
use crate::config::EngineConfig;
use crate::model::{ConnectionDescriptor, EntityPath, Message, QueueNode, QueueType};
use std::sync::Arc;

/// Queue side of the resource helper.
#[derive(Clone)]
pub struct QueueHelper {
    broker: Arc<dyn BrokerClient>,
    operations: EntityOperations,
}

impl QueueHelper {
    pub fn new(broker: Arc<dyn BrokerClient>, config: EngineConfig) -> Self {
        Self {
            operations: EntityOperations::new(Arc::clone(&broker), config),
            broker,
        }
    }

    /// Queues with runtime counts, capped at the queue list limit.
    pub async fn list_queues(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<Vec<QueueNode>> {
        let management = self.broker.management(connection).await?;
        let management = management.as_ref();
        let queues = collect_capped(
            self.operations.config().queue_list_fetch_count(),
            |continuation| management.list_queues(continuation),
        )
        .await?;
        log::debug!("Listed {} queue(s)", queues.len());
        Ok(queues
            .into_iter()
            .map(|q| QueueNode {
                name: q.name,
                runtime: q.runtime,
            })
            .collect())
    }

    pub async fn get_queue_runtime_info(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
    ) -> ServiceBusResult<RuntimeInfo> {
        let management = self.broker.management(connection).await?;
        Ok(management.queue_runtime(queue).await?.runtime)
    }

    pub async fn peek_messages(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        is_dlq: bool,
    ) -> Vec<Message> {
        self.operations
            .peek(connection, &EntityPath::queue(queue), QueueType::from_dlq_flag(is_dlq))
            .await
    }

    pub async fn delete_message(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        message: &Message,
        is_dlq: bool,
    ) -> ServiceBusResult<u64> {
        self.operations
            .delete(connection, &EntityPath::queue(queue), message, QueueType::from_dlq_flag(is_dlq))
            .await
    }

    pub async fn dead_letter_message(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        message: &Message,
    ) -> ServiceBusResult<u64> {
        self.operations
            .dead_letter(connection, &EntityPath::queue(queue), message)
            .await
    }

    pub async fn purge_messages(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        is_dlq: bool,
    ) -> ServiceBusResult<u64> {
        self.operations
            .purge(connection, &EntityPath::queue(queue), QueueType::from_dlq_flag(is_dlq))
            .await
    }

    pub async fn transfer_dlq_messages(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
    ) -> ServiceBusResult<u64> {
        self.operations
            .transfer_dead_letters(connection, &EntityPath::queue(queue))
            .await
    }

    pub async fn resubmit_dlq_message(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        message: &Message,
    ) -> ServiceBusResult<u64> {
        self.operations
            .resubmit(connection, &EntityPath::queue(queue), message)
            .await
    }

    pub async fn send_message(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        content: &str,
    ) -> ServiceBusResult<()> {
        self.send_outgoing(connection, queue, OutgoingMessage::from_text(content))
            .await
    }

    pub async fn send_outgoing(
        &self,
        connection: &ConnectionDescriptor,
        queue: &str,
        message: OutgoingMessage,
    ) -> ServiceBusResult<()> {
        self.operations.send(connection, queue, message).await
    }
}
