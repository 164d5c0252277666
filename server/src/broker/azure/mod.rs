//! Azure Service Bus adapter.
//!
//! The data plane runs on `azservicebus`: every receiver or sender gets its
//! own client built from the connection string, and both are disposed
//! together. The management plane runs on Resource Manager
//! ([`management::AzureManagement`]) with client-credential tokens.
//!
//! In managed-identity mode the descriptor only names the namespace; the
//! data-plane connection string is fetched through the root authorization
//! rule's `listKeys` call before a handle is opened.

pub mod auth;
pub mod consumer;
pub mod management;
pub mod producer;
mod properties;

use self::auth::ManagementTokenSource;
use self::consumer::AzureReceiver;
use self::management::{AzureManagement, ManagementApiError};
use self::producer::AzureSender;
use super::{BrokerClient, ManagementClient, MessageReceiver, MessageSender, ReceiveMode};
use crate::common::{ServiceBusError, ServiceBusResult};
use crate::config::ManagementConfig;
use crate::model::{ConnectionDescriptor, ConnectionString};
use async_trait::async_trait;
use azservicebus::core::BasicRetryPolicy;
use azservicebus::{
    ServiceBusClient, ServiceBusClientOptions, ServiceBusReceiveMode, ServiceBusReceiverOptions,
    ServiceBusSenderOptions,
};
use std::fmt::Display;
use std::sync::Arc;

/// Maps a client library error onto the connection error categories.
pub(crate) fn classify_client_error(err: &impl Display) -> ServiceBusError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("401") {
        ServiceBusError::Unauthorized(text)
    } else if lower.contains("connection string") || lower.contains("connectionstring") {
        ServiceBusError::InvalidConnectionString(text)
    } else {
        ServiceBusError::ConnectionFailed(text)
    }
}

/// Closes a link and then its client. The client is closed even when the
/// link fails to close; the first error is returned.
pub(crate) async fn dispose_pair<E, L, C>(link: L, client: C) -> ServiceBusResult<()>
where
    E: Display,
    L: Future<Output = Result<(), E>>,
    C: Future<Output = Result<(), E>>,
{
    let link_result = link.await;
    let client_result = client.await;
    link_result
        .and(client_result)
        .map_err(|e| classify_client_error(&e))
}

pub struct AzureBrokerClient {
    http: reqwest::Client,
    config: ManagementConfig,
    tokens: Arc<ManagementTokenSource>,
    page_size: u32,
}

impl AzureBrokerClient {
    pub fn new(config: ManagementConfig, page_size: u32) -> Self {
        let http = reqwest::Client::new();
        let tokens = Arc::new(ManagementTokenSource::new(http.clone(), config.clone()));
        Self {
            http,
            config,
            tokens,
            page_size,
        }
    }

    fn management_for(&self, parsed: &ConnectionString) -> ServiceBusResult<AzureManagement> {
        let subscription_id = self
            .config
            .subscription_id()
            .map_err(|e| ManagementApiError::MissingConfiguration(e.to_string()))?;
        let resource_group = self
            .config
            .resource_group()
            .map_err(|e| ManagementApiError::MissingConfiguration(e.to_string()))?;
        Ok(AzureManagement::new(
            self.http.clone(),
            Arc::clone(&self.tokens),
            self.config.management_endpoint(),
            &subscription_id,
            &resource_group,
            &parsed.namespace,
            self.page_size,
        ))
    }

    async fn data_plane_connection_string(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<String> {
        let parsed = ConnectionString::parse(connection)?;
        if connection.use_managed_identity {
            log::debug!("Resolving data-plane keys for {}", parsed.namespace);
            self.management_for(&parsed)?
                .primary_connection_string()
                .await
        } else {
            Ok(connection.connection_string.clone())
        }
    }

    async fn open_client(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<ServiceBusClient<BasicRetryPolicy>> {
        let connection_string = self.data_plane_connection_string(connection).await?;
        ServiceBusClient::new_from_connection_string(
            &connection_string,
            ServiceBusClientOptions::default(),
        )
        .await
        .map_err(|e| classify_client_error(&e))
    }
}

#[async_trait]
impl BrokerClient for AzureBrokerClient {
    async fn management(
        &self,
        connection: &ConnectionDescriptor,
    ) -> ServiceBusResult<Box<dyn ManagementClient>> {
        let parsed = ConnectionString::parse(connection)?;
        Ok(Box::new(self.management_for(&parsed)?))
    }

    async fn create_receiver(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
        mode: ReceiveMode,
    ) -> ServiceBusResult<Box<dyn MessageReceiver>> {
        let mut client = self.open_client(connection).await?;
        let receive_mode = match mode {
            ReceiveMode::PeekOnly | ReceiveMode::PeekLock => ServiceBusReceiveMode::PeekLock,
            ReceiveMode::ReceiveAndDelete => ServiceBusReceiveMode::ReceiveAndDelete,
        };
        let options = ServiceBusReceiverOptions {
            receive_mode,
            ..Default::default()
        };
        let receiver = client
            .create_receiver_for_queue(path, options)
            .await
            .map_err(|e| {
                ServiceBusError::ReceiverCreationFailed(format!("Receiver for {path}: {e}"))
            })?;
        Ok(Box::new(AzureReceiver::new(path.to_string(), client, receiver)))
    }

    async fn create_sender(
        &self,
        connection: &ConnectionDescriptor,
        path: &str,
    ) -> ServiceBusResult<Box<dyn MessageSender>> {
        let mut client = self.open_client(connection).await?;
        let sender = client
            .create_sender(path, ServiceBusSenderOptions::default())
            .await
            .map_err(|e| ServiceBusError::SenderCreationFailed(format!("Sender for {path}: {e}")))?;
        Ok(Box::new(AzureSender::new(path.to_string(), client, sender)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_classified() {
        assert!(matches!(
            classify_client_error(&"Unauthorized access. 'Listen' claim(s) are required"),
            ServiceBusError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_client_error(&"Invalid connection string format"),
            ServiceBusError::InvalidConnectionString(_)
        ));
        assert!(matches!(
            classify_client_error(&"No such host is known"),
            ServiceBusError::ConnectionFailed(_)
        ));
    }

    #[tokio::test]
    async fn client_is_closed_when_link_close_fails() {
        let client_closed = std::sync::atomic::AtomicBool::new(false);
        let result = dispose_pair(
            async { Err::<(), _>("Unauthorized: link detach rejected".to_string()) },
            async {
                client_closed.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(client_closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(matches!(result, Err(ServiceBusError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn client_error_is_reported_after_clean_link_close() {
        let result = dispose_pair(
            async { Ok(()) },
            async { Err::<(), _>("connection reset".to_string()) },
        )
        .await;
        assert!(matches!(result, Err(ServiceBusError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn management_requires_subscription_and_resource_group() {
        let client = AzureBrokerClient::new(ManagementConfig::default(), 100);
        let descriptor = ConnectionDescriptor::new(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=Root;SharedAccessKey=a2V5",
            false,
        );
        if std::env::var("AZURE_AD__SUBSCRIPTION_ID").is_err() {
            let err = client.management(&descriptor).await.err().unwrap();
            assert!(matches!(err, ServiceBusError::ConfigurationError(_)));
        }
    }

    #[tokio::test]
    async fn malformed_connection_string_fails_before_any_request() {
        let client = AzureBrokerClient::new(ManagementConfig::default(), 100);
        let descriptor = ConnectionDescriptor::new("garbage", false);
        let err = client.management(&descriptor).await.err().unwrap();
        assert!(matches!(err, ServiceBusError::InvalidConnectionString(_)));
    }
}
