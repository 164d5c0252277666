use super::dispose_pair;
use super::properties::from_amqp_properties;
use crate::broker::{DeadLetterOptions, MessageReceiver, ReceivedMessage};
use crate::common::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use azservicebus::core::BasicRetryPolicy;
use azservicebus::receiver::DeadLetterOptions as AzureDeadLetterOptions;
use azservicebus::{ServiceBusClient, ServiceBusReceivedMessage, ServiceBusReceiver};
use chrono::DateTime;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Projects a peeked or received azservicebus message into the broker-neutral form.
macro_rules! project_message {
    ($msg:expr) => {{
        let msg = $msg;
        let enqueued = msg.enqueued_time();
        ReceivedMessage {
            message_id: msg.message_id().map(|s| s.to_string()),
            correlation_id: msg.correlation_id().map(|s| s.to_string()),
            content_type: msg.content_type().map(|s| s.to_string()),
            subject: msg.subject().map(|s| s.to_string()),
            to: msg.to().map(|s| s.to_string()),
            session_id: msg.session_id().map(|s| s.to_string()),
            partition_key: msg.partition_key().map(|s| s.to_string()),
            reply_to: msg.reply_to().map(|s| s.to_string()),
            reply_to_session_id: msg.reply_to_session_id().map(|s| s.to_string()),
            transaction_partition_key: msg.transaction_partition_key().map(|s| s.to_string()),
            body: msg.body().map(|b| b.to_vec()).unwrap_or_default(),
            delivery_count: msg.delivery_count().map(|c| c as u32).unwrap_or(0),
            sequence_number: msg.sequence_number(),
            time_to_live: msg.time_to_live(),
            enqueued_time: DateTime::from_timestamp(enqueued.unix_timestamp(), enqueued.nanosecond()),
            application_properties: from_amqp_properties(msg.application_properties()),
            dead_letter_reason: msg.dead_letter_reason().map(|s| s.to_string()),
            dead_letter_error_description: msg
                .dead_letter_error_description()
                .map(|s| s.to_string()),
            lock_token: None,
        }
    }};
}

struct ReceiverState {
    client: ServiceBusClient<BasicRetryPolicy>,
    receiver: ServiceBusReceiver,
    /// Locked messages awaiting settlement, keyed by the token handed out
    pending: HashMap<Uuid, ServiceBusReceivedMessage>,
}

/// Receiver scoped to one operation; owns its client so disposing it closes
/// the connection as well.
pub struct AzureReceiver {
    path: String,
    state: Mutex<Option<ReceiverState>>,
}

impl AzureReceiver {
    pub(super) fn new(
        path: String,
        client: ServiceBusClient<BasicRetryPolicy>,
        receiver: ServiceBusReceiver,
    ) -> Self {
        Self {
            path,
            state: Mutex::new(Some(ReceiverState {
                client,
                receiver,
                pending: HashMap::new(),
            })),
        }
    }

    fn disposed() -> ServiceBusError {
        ServiceBusError::InternalError("Receiver already disposed".to_string())
    }

    fn take_pending(
        state: &mut ReceiverState,
        message: &ReceivedMessage,
    ) -> Option<(Uuid, ServiceBusReceivedMessage)> {
        let token = message.lock_token?;
        state.pending.remove(&token).map(|m| (token, m))
    }
}

#[async_trait]
impl MessageReceiver for AzureReceiver {
    async fn peek_messages(
        &mut self,
        max_count: u32,
        from_sequence: Option<i64>,
    ) -> ServiceBusResult<Vec<ReceivedMessage>> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(Self::disposed)?;
        let messages = state
            .receiver
            .peek_messages(max_count, from_sequence)
            .await
            .map_err(|e| {
                ServiceBusError::MessageReceiveFailed(format!("Peek on {} failed: {e}", self.path))
            })?;
        Ok(messages.iter().map(|m| project_message!(m)).collect())
    }

    async fn receive_messages(
        &mut self,
        max_count: u32,
        max_wait: Option<Duration>,
    ) -> ServiceBusResult<Vec<ReceivedMessage>> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(Self::disposed)?;

        // the link enforces the wait; a cancelled receive-and-delete call loses messages
        let received = match max_wait {
            Some(wait) => {
                state
                    .receiver
                    .receive_messages_with_max_wait_time(max_count, Some(wait))
                    .await
            }
            None => state.receiver.receive_messages(max_count).await,
        }
        .map_err(|e| {
            ServiceBusError::MessageReceiveFailed(format!("Receive on {} failed: {e}", self.path))
        })?;

        let mut projected = Vec::with_capacity(received.len());
        for message in received {
            let token = Uuid::new_v4();
            let mut neutral = project_message!(&message);
            neutral.lock_token = Some(token);
            state.pending.insert(token, message);
            projected.push(neutral);
        }
        Ok(projected)
    }

    async fn complete_message(&mut self, message: &ReceivedMessage) -> ServiceBusResult<()> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(Self::disposed)?;
        let (token, locked) = Self::take_pending(state, message).ok_or_else(|| {
            ServiceBusError::MessageCompleteFailed(format!(
                "No lock held for message {:?}",
                message.message_id
            ))
        })?;
        if let Err(e) = state.receiver.complete_message(&locked).await {
            state.pending.insert(token, locked);
            return Err(ServiceBusError::MessageCompleteFailed(e.to_string()));
        }
        Ok(())
    }

    async fn dead_letter_message(
        &mut self,
        message: &ReceivedMessage,
        options: DeadLetterOptions,
    ) -> ServiceBusResult<()> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(Self::disposed)?;
        let (token, locked) = Self::take_pending(state, message).ok_or_else(|| {
            ServiceBusError::MessageDeadLetterFailed(format!(
                "No lock held for message {:?}",
                message.message_id
            ))
        })?;
        let azure_options = AzureDeadLetterOptions {
            dead_letter_reason: options.reason,
            dead_letter_error_description: options.error_description,
            properties_to_modify: None,
        };
        if let Err(e) = state
            .receiver
            .dead_letter_message(&locked, azure_options)
            .await
        {
            state.pending.insert(token, locked);
            return Err(ServiceBusError::MessageDeadLetterFailed(e.to_string()));
        }
        Ok(())
    }

    async fn dispose(&mut self) -> ServiceBusResult<()> {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.take() {
            if !state.pending.is_empty() {
                log::debug!(
                    "Releasing {} unsettled lock(s) on {}",
                    state.pending.len(),
                    self.path
                );
            }
            drop(state.pending);
            dispose_pair(state.receiver.dispose(), state.client.dispose()).await?;
        }
        Ok(())
    }
}
