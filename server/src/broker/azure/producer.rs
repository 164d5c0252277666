use super::dispose_pair;
use super::properties::to_amqp_properties;
use crate::broker::{MessageSender, OutgoingMessage};
use crate::common::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use azservicebus::core::BasicRetryPolicy;
use azservicebus::{ServiceBusClient, ServiceBusMessage, ServiceBusSender};
use tokio::sync::Mutex;

struct SenderState {
    client: ServiceBusClient<BasicRetryPolicy>,
    sender: ServiceBusSender,
}

/// Sender scoped to one operation.
pub struct AzureSender {
    path: String,
    state: Mutex<Option<SenderState>>,
}

impl AzureSender {
    pub(super) fn new(
        path: String,
        client: ServiceBusClient<BasicRetryPolicy>,
        sender: ServiceBusSender,
    ) -> Self {
        Self {
            path,
            state: Mutex::new(Some(SenderState { client, sender })),
        }
    }

    /// Builds the wire message. Delivery metadata is left to the broker.
    fn to_service_bus_message(message: OutgoingMessage) -> ServiceBusMessage {
        let mut sb = ServiceBusMessage::new(message.body);
        if let Some(id) = message.message_id {
            if let Err(e) = sb.set_message_id(id) {
                log::warn!("Failed to set message ID on outgoing message: {e:?}");
            }
        }
        if let Some(correlation_id) = message.correlation_id {
            sb.set_correlation_id(correlation_id);
        }
        if let Some(content_type) = message.content_type {
            sb.set_content_type(content_type);
        }
        if let Some(subject) = message.subject {
            sb.set_subject(subject);
        }
        if let Some(to) = message.to {
            sb.set_to(to);
        }
        if let Some(reply_to) = message.reply_to {
            sb.set_reply_to(reply_to);
        }
        if let Some(session_id) = message.session_id {
            if let Err(e) = sb.set_session_id(session_id) {
                log::warn!("Failed to set session ID on outgoing message: {e:?}");
            }
        }
        if let Some(partition_key) = message.partition_key {
            if let Err(e) = sb.set_partition_key(partition_key) {
                log::warn!("Failed to set partition key on outgoing message: {e:?}");
            }
        }
        if let Some(reply_to_session_id) = message.reply_to_session_id {
            sb.set_reply_to_session_id(reply_to_session_id);
        }
        if let Some(key) = message.transaction_partition_key {
            if let Err(e) = sb.set_transaction_partition_key(key) {
                log::warn!("Failed to set transaction partition key on outgoing message: {e:?}");
            }
        }
        if let Some(ttl) = message.time_to_live {
            if let Err(e) = sb.set_time_to_live(ttl) {
                log::warn!("Failed to set time to live on outgoing message: {e:?}");
            }
        }
        *sb.application_properties_mut() = to_amqp_properties(message.application_properties);
        sb
    }
}

#[async_trait]
impl MessageSender for AzureSender {
    async fn send_message(&mut self, message: OutgoingMessage) -> ServiceBusResult<()> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(|| {
            ServiceBusError::InternalError("Sender already disposed".to_string())
        })?;
        state
            .sender
            .send_message(Self::to_service_bus_message(message))
            .await
            .map_err(|e| {
                ServiceBusError::MessageSendFailed(format!("Send to {} failed: {e}", self.path))
            })
    }

    async fn send_messages(&mut self, messages: Vec<OutgoingMessage>) -> ServiceBusResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(|| {
            ServiceBusError::InternalError("Sender already disposed".to_string())
        })?;
        let batch: Vec<ServiceBusMessage> = messages
            .into_iter()
            .map(Self::to_service_bus_message)
            .collect();
        state.sender.send_messages(batch).await.map_err(|e| {
            ServiceBusError::MessageSendFailed(format!("Batch send to {} failed: {e}", self.path))
        })
    }

    async fn dispose(&mut self) -> ServiceBusResult<()> {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.take() {
            dispose_pair(state.sender.dispose(), state.client.dispose()).await?;
        }
        Ok(())
    }
}
