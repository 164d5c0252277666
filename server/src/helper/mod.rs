//! Listing, browsing and lifecycle operations against a namespace.
//!
//! [`EntityOperations`] implements every message operation once, for any
//! [`EntityPath`]: the path decides where receivers point, where the
//! dead-letter sub-queue lives and where clones are sent. [`TopicHelper`] and
//! [`QueueHelper`] are the two public faces the coordinator uses; each adds
//! its own listing and runtime-info calls.
//!
//! Handles are created per call and released on every exit path through
//! [`scan::release_receiver`] / [`scan::release_sender`].

pub mod queue;
pub mod scan;
pub mod topic;

pub use queue::QueueHelper;
pub use scan::{MessageMatcher, SCAN_WARNING, Settlement};
pub use topic::TopicHelper;

use crate::broker::{
    BrokerClient, DeadLetterOptions, NamespaceProperties, OutgoingMessage, Page, ReceiveMode,
};
use crate::common::{ServiceBusError, ServiceBusResult};
use crate::config::EngineConfig;
use crate::model::{ConnectionDescriptor, EntityPath, Message, QueueType};
use scan::{drain, release_receiver, release_sender, scan_and_settle};
use std::future::Future;
use std::sync::Arc;

/// Walks a paginated listing, stopping as soon as `limit` items have been
/// collected, even in the middle of a page.
pub(crate) async fn collect_capped<T, F, Fut>(limit: u32, mut fetch: F) -> ServiceBusResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ServiceBusResult<Page<T>>>,
{
    let limit = limit as usize;
    let mut items = Vec::new();
    let mut continuation = None;

    loop {
        let page = fetch(continuation.take()).await?;
        for item in page.items {
            if items.len() >= limit {
                return Ok(items);
            }
            items.push(item);
        }
        match page.continuation {
            Some(next) if items.len() < limit => continuation = Some(next),
            _ => return Ok(items),
        }
    }
}

/// Follows every continuation of a management listing.
pub(crate) async fn collect_all<T, F, Fut>(fetch: F) -> ServiceBusResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ServiceBusResult<Page<T>>>,
{
    collect_capped(u32::MAX, fetch).await
}

/// Message operations shared by queues and subscriptions.
#[derive(Clone)]
pub struct EntityOperations {
    broker: Arc<dyn BrokerClient>,
    config: EngineConfig,
}

impl EntityOperations {
    pub fn new(broker: Arc<dyn BrokerClient>, config: EngineConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn fetch_count(&self, entity: &EntityPath) -> u32 {
        match entity {
            EntityPath::Queue { .. } => self.config.queue_message_fetch_count(),
            EntityPath::Subscription { .. } => self.config.topic_message_fetch_count(),
        }
    }

    pub async fn namespace_info(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<NamespaceProperties> {
        let management = self.broker.management(connection).await?;
        management.namespace_properties().await
    }

    /// Non-destructive browse. Failures are logged and yield an empty page.
    pub async fn peek(
        &self,
        connection: &ConnectionDescriptor,
        entity: &EntityPath,
        queue_type: QueueType,
    ) -> Vec<Message> {
        let path = entity.path_for(queue_type);
        match self.try_peek(connection, &path, self.fetch_count(entity)).await {
            Ok(messages) => Message::convert_all(messages, queue_type.is_dead_letter()),
            Err(e) => {
                log::warn!("Failed to peek messages from {path}: {e}");
                Vec::new()
            }
        }
    }

    async fn try_peek(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
        max_count: u32,
    ) -> ServiceBusResult<Vec<crate::broker::ReceivedMessage>> {
        let mut receiver = self
            .broker
            .create_receiver(connection, path, ReceiveMode::PeekOnly)
            .await?;
        let result = receiver.peek_messages(max_count, None).await;
        release_receiver(receiver, path, result).await
    }

    /// Scan-and-complete. Returns 1 when the message was found and removed.
    pub async fn delete(
        &self,
        connection: &ConnectionDescriptor,
        entity: &EntityPath,
        message: &Message,
        queue_type: QueueType,
    ) -> ServiceBusResult<u64> {
        let path = entity.path_for(queue_type);
        self.scan(
            connection,
            &path,
            self.fetch_count(entity),
            &MessageMatcher::by_id(message.message_id.clone()),
            Settlement::Complete,
        )
        .await
    }

    /// Scan-and-dead-letter on the main entity.
    pub async fn dead_letter(
        &self,
        connection: &ConnectionDescriptor,
        entity: &EntityPath,
        message: &Message,
    ) -> ServiceBusResult<u64> {
        let path = entity.receive_path();
        self.scan(
            connection,
            &path,
            self.fetch_count(entity),
            &MessageMatcher::by_id(message.message_id.clone()),
            Settlement::DeadLetter(DeadLetterOptions::default()),
        )
        .await
    }

    async fn scan(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
        fetch_count: u32,
        matcher: &MessageMatcher,
        settlement: Settlement,
    ) -> ServiceBusResult<u64> {
        let mut receiver = self
            .broker
            .create_receiver(connection, path, ReceiveMode::PeekLock)
            .await?;
        let result = scan_and_settle(
            receiver.as_mut(),
            fetch_count,
            self.config.purge_receive_timeout(),
            matcher,
            settlement,
        )
        .await;
        release_receiver(receiver, path, result).await
    }

    /// Empties the main entity or its dead-letter sub-queue.
    pub async fn purge(
        &self,
        connection: &ConnectionDescriptor,
        entity: &EntityPath,
        queue_type: QueueType,
    ) -> ServiceBusResult<u64> {
        let path = entity.path_for(queue_type);
        let mut receiver = self
            .broker
            .create_receiver(connection, &path, ReceiveMode::ReceiveAndDelete)
            .await?;
        let result = drain(
            receiver.as_mut(),
            None,
            self.fetch_count(entity),
            self.config.purge_receive_timeout(),
        )
        .await;
        let purged = release_receiver(receiver, &path, result).await?;
        log::info!("Purged {purged} message(s) from {path}");
        Ok(purged)
    }

    /// Moves every dead-lettered message back to the entity's send path.
    pub async fn transfer_dead_letters(
        &self,
        connection: &ConnectionDescriptor,
        entity: &EntityPath,
    ) -> ServiceBusResult<u64> {
        let dlq_path = entity.dead_letter_path();
        let send_path = entity.send_path();

        let mut sender = self.broker.create_sender(connection, send_path).await?;
        let mut receiver = match self
            .broker
            .create_receiver(connection, &dlq_path, ReceiveMode::ReceiveAndDelete)
            .await
        {
            Ok(receiver) => receiver,
            Err(e) => return release_sender(sender, send_path, Err(e)).await,
        };

        let result = drain(
            receiver.as_mut(),
            Some(sender.as_mut()),
            self.fetch_count(entity),
            self.config.purge_receive_timeout(),
        )
        .await;
        let result = release_receiver(receiver, &dlq_path, result).await;
        let moved = release_sender(sender, send_path, result).await?;
        log::info!("Transferred {moved} message(s) from {dlq_path} to {send_path}");
        Ok(moved)
    }

    /// Re-sends one dead-lettered message and removes the original.
    ///
    /// The original is located by sequence number, cloned, sent to the
    /// entity's send path and then deleted from the dead-letter sub-queue.
    /// The steps are not atomic: a failure after the send leaves both copies.
    pub async fn resubmit(
        &self,
        connection: &ConnectionDescriptor,
        entity: &EntityPath,
        message: &Message,
    ) -> ServiceBusResult<u64> {
        let dlq_path = entity.dead_letter_path();
        let sequence = message.sequence_number;

        let mut peeker = self
            .broker
            .create_receiver(connection, &dlq_path, ReceiveMode::PeekOnly)
            .await?;
        let peeked = peeker.peek_messages(1, Some(sequence)).await;
        let peeked = release_receiver(peeker, &dlq_path, peeked).await?;
        let original = peeked
            .into_iter()
            .find(|m| m.sequence_number == sequence)
            .ok_or_else(|| ServiceBusError::MessageNotFound {
                path: dlq_path.clone(),
                sequence,
            })?;

        self.send(
            connection,
            entity.send_path(),
            OutgoingMessage::clone_from_received(&original),
        )
        .await?;

        let matcher = MessageMatcher::by_id_and_sequence(original.message_id.clone(), sequence);
        let removed = self
            .scan(
                connection,
                &dlq_path,
                self.fetch_count(entity),
                &matcher,
                Settlement::Complete,
            )
            .await?;
        if removed == 0 {
            log::warn!(
                "Resubmitted sequence {sequence} from {dlq_path} but the original was not found for removal"
            );
        }
        Ok(1)
    }

    pub async fn send(
        &self,
        connection: &ConnectionDescriptor,
        send_path: &str,
        message: OutgoingMessage,
    ) -> ServiceBusResult<()> {
        let mut sender = self.broker.create_sender(connection, send_path).await?;
        let result = sender.send_message(message).await;
        release_sender(sender, send_path, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_capped_stops_mid_page() {
        let pages = vec![
            Page {
                items: vec![1, 2, 3],
                continuation: Some("1".to_string()),
            },
            Page::last(vec![4, 5, 6]),
        ];
        let mut calls = 0;
        let items = collect_capped(4, |continuation| {
            let index = continuation.map(|c| c.parse::<usize>().unwrap_or(0)).unwrap_or(0);
            calls += 1;
            let page = pages[index].clone();
            async move { Ok::<_, ServiceBusError>(page) }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 2, 3, 4]);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn collect_capped_does_not_fetch_past_limit() {
        let mut calls = 0;
        let items = collect_capped(2, |_| {
            calls += 1;
            async move {
                Ok::<_, ServiceBusError>(Page {
                    items: vec!["a", "b"],
                    continuation: Some("next".to_string()),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(calls, 1);
    }
}
