use super::{EntityOperations, collect_all, collect_capped};
use crate::broker::{BrokerClient, ManagementClient, NamespaceProperties, OutgoingMessage, RuntimeInfo};
use crate::common::ServiceBusResult;
use crate::config::EngineConfig;
use crate::model::{
    ConnectionDescriptor, EntityPath, Message, QueueType, SubscriptionNode, TopicNode,
};
use futures::future::try_join_all;
use std::sync::Arc;

/// Topic and subscription side of the resource helper.
#[derive(Clone)]
pub struct TopicHelper {
    broker: Arc<dyn BrokerClient>,
    operations: EntityOperations,
}

impl TopicHelper {
    pub fn new(broker: Arc<dyn BrokerClient>, config: EngineConfig) -> Self {
        Self {
            operations: EntityOperations::new(Arc::clone(&broker), config),
            broker,
        }
    }

    fn config(&self) -> &EngineConfig {
        self.operations.config()
    }

    pub async fn get_namespace_info(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<NamespaceProperties> {
        self.operations.namespace_info(connection).await
    }

    /// Topics with their subscriptions. Only the topic enumeration is capped
    /// at the topic list limit; every subscription of a listed topic is read.
    /// Subscriptions of all topics are fetched concurrently.
    pub async fn list_topology(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<Vec<TopicNode>> {
        let management = self.broker.management(connection).await?;
        let management = management.as_ref();
        let limit = self.config().topic_list_fetch_count();

        let topics = collect_capped(limit, |continuation| management.list_topics(continuation)).await?;
        log::debug!("Listed {} topic(s)", topics.len());

        let subscriptions = try_join_all(
            topics
                .iter()
                .map(|topic| Self::subscriptions_of(management, &topic.name)),
        )
        .await?;

        Ok(topics
            .into_iter()
            .zip(subscriptions)
            .map(|(topic, subscriptions)| TopicNode {
                name: topic.name,
                subscriptions,
            })
            .collect())
    }

    async fn subscriptions_of(
        management: &dyn ManagementClient,
        topic: &str,
    ) -> ServiceBusResult<Vec<SubscriptionNode>> {
        let subscriptions =
            collect_all(|continuation| management.list_subscriptions(topic, continuation)).await?;
        Ok(subscriptions
            .into_iter()
            .map(|s| SubscriptionNode {
                name: s.name,
                runtime: s.runtime,
            })
            .collect())
    }

    pub async fn get_topic(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
        with_subscriptions: bool,
    ) -> ServiceBusResult<TopicNode> {
        let management = self.broker.management(connection).await?;
        let topic = management.topic(path).await?;
        let subscriptions = if with_subscriptions {
            Self::subscriptions_of(management.as_ref(), &topic.name).await?
        } else {
            Vec::new()
        };
        Ok(TopicNode {
            name: topic.name,
            subscriptions,
        })
    }

    pub async fn get_subscription(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
    ) -> ServiceBusResult<SubscriptionNode> {
        let management = self.broker.management(connection).await?;
        let props = management.subscription_runtime(topic, subscription).await?;
        Ok(SubscriptionNode {
            name: props.name,
            runtime: props.runtime,
        })
    }

    pub async fn get_subscription_runtime_info(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
    ) -> ServiceBusResult<RuntimeInfo> {
        Ok(self
            .get_subscription(connection, topic, subscription)
            .await?
            .runtime)
    }

    pub async fn peek_subscription_messages(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
        is_dlq: bool,
    ) -> Vec<Message> {
        self.operations
            .peek(
                connection,
                &EntityPath::subscription(topic, subscription),
                QueueType::from_dlq_flag(is_dlq),
            )
            .await
    }

    pub async fn delete_message(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
        message: &Message,
        is_dlq: bool,
    ) -> ServiceBusResult<u64> {
        self.operations
            .delete(
                connection,
                &EntityPath::subscription(topic, subscription),
                message,
                QueueType::from_dlq_flag(is_dlq),
            )
            .await
    }

    pub async fn dead_letter_message(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
        message: &Message,
    ) -> ServiceBusResult<u64> {
        self.operations
            .dead_letter(
                connection,
                &EntityPath::subscription(topic, subscription),
                message,
            )
            .await
    }

    pub async fn purge_messages(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
        is_dlq: bool,
    ) -> ServiceBusResult<u64> {
        self.operations
            .purge(
                connection,
                &EntityPath::subscription(topic, subscription),
                QueueType::from_dlq_flag(is_dlq),
            )
            .await
    }

    /// Clones are sent to the topic, so every subscription receives them.
    pub async fn transfer_dlq_messages(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
    ) -> ServiceBusResult<u64> {
        self.operations
            .transfer_dead_letters(connection, &EntityPath::subscription(topic, subscription))
            .await
    }

    pub async fn resubmit_dlq_message(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        subscription: &str,
        message: &Message,
    ) -> ServiceBusResult<u64> {
        self.operations
            .resubmit(
                connection,
                &EntityPath::subscription(topic, subscription),
                message,
            )
            .await
    }

    pub async fn send_message(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        content: &str,
    ) -> ServiceBusResult<()> {
        self.send_outgoing(connection, topic, OutgoingMessage::from_text(content))
            .await
    }

    pub async fn send_outgoing(
        &self,
        connection: &ConnectionDescriptor,
        topic: &str,
        message: OutgoingMessage,
    ) -> ServiceBusResult<()> {
        self.operations.send(connection, topic, message).await
    }
}
