//! Management plane over the Azure Resource Manager REST API.

use super::auth::ManagementTokenSource;
use crate::broker::{
    ManagementClient, NamespaceProperties, Page, QueueProperties, RuntimeInfo,
    SubscriptionProperties, TopicProperties,
};
use crate::common::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const API_VERSION_SERVICE_BUS: &str = "2021-11-01";

/// Failures specific to talking to Resource Manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagementApiError {
    #[error("Missing required configuration: {0}")]
    MissingConfiguration(String),
    #[error("JSON parsing failed: {0}")]
    JsonParsingFailed(String),
    #[error("Continuation link points outside the management endpoint: {0}")]
    ForeignContinuation(String),
}

impl From<ManagementApiError> for ServiceBusError {
    fn from(err: ManagementApiError) -> Self {
        match err {
            ManagementApiError::MissingConfiguration(msg) => ServiceBusError::ConfigurationError(msg),
            other => ServiceBusError::ManagementFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedResource {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamespaceResponse {
    name: String,
    properties: NamespaceResponseProperties,
}

#[derive(Debug, Deserialize)]
struct NamespaceResponseProperties {
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CountedResource {
    name: String,
    properties: CountedProperties,
}

#[derive(Debug, Deserialize)]
struct CountedProperties {
    #[serde(rename = "countDetails", default)]
    count_details: CountDetails,
}

#[derive(Debug, Deserialize, Default)]
struct CountDetails {
    #[serde(rename = "activeMessageCount", default)]
    active_message_count: u64,
    #[serde(rename = "deadLetterMessageCount", default)]
    dead_letter_message_count: u64,
}

impl From<CountDetails> for RuntimeInfo {
    fn from(details: CountDetails) -> Self {
        RuntimeInfo {
            message_count: details.active_message_count,
            dlq_count: details.dead_letter_message_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessKeys {
    #[serde(rename = "primaryConnectionString")]
    primary_connection_string: String,
}

/// Resource Manager client bound to one namespace.
pub struct AzureManagement {
    http: reqwest::Client,
    tokens: Arc<ManagementTokenSource>,
    management_endpoint: String,
    namespace_url: String,
    namespace: String,
    page_size: u32,
}

impl AzureManagement {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<ManagementTokenSource>,
        management_endpoint: &str,
        subscription_id: &str,
        resource_group: &str,
        namespace: &str,
        page_size: u32,
    ) -> Self {
        let management_endpoint = management_endpoint.trim_end_matches('/').to_string();
        let namespace_url = format!(
            "{management_endpoint}/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.ServiceBus/namespaces/{namespace}"
        );
        Self {
            http,
            tokens,
            management_endpoint,
            namespace_url,
            namespace: namespace.to_string(),
            page_size,
        }
    }

    fn url(&self, relative: &str) -> String {
        format!(
            "{}{relative}?api-version={API_VERSION_SERVICE_BUS}",
            self.namespace_url
        )
    }

    fn list_url(&self, relative: &str, continuation: Option<String>) -> ServiceBusResult<String> {
        match continuation {
            Some(next_link) => {
                if !next_link.starts_with(&self.management_endpoint) {
                    return Err(ManagementApiError::ForeignContinuation(next_link).into());
                }
                Ok(next_link)
            }
            None => Ok(format!("{}&$top={}", self.url(relative), self.page_size)),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, operation: &str) -> ServiceBusResult<T> {
        let token = self.tokens.token().await?;
        log::debug!("GET {url}");

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServiceBusError::from_azure_response(response, operation).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ManagementApiError::JsonParsingFailed(format!("{operation}: {e}")).into())
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &str,
    ) -> ServiceBusResult<(Vec<T>, Option<String>)> {
        let list: ListResponse<T> = self.get_json(url, operation).await?;
        Ok((list.value, list.next_link))
    }

    /// Primary connection string of the namespace's root authorization rule.
    pub async fn primary_connection_string(&self) -> ServiceBusResult<String> {
        let token = self.tokens.token().await?;
        let url = self.url("/authorizationRules/RootManageSharedAccessKey/listKeys");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServiceBusError::from_azure_response(response, "list_keys").await);
        }

        let keys: AccessKeys = response
            .json()
            .await
            .map_err(|e| ManagementApiError::JsonParsingFailed(format!("list_keys: {e}")))?;
        Ok(keys.primary_connection_string)
    }
}

#[async_trait]
impl ManagementClient for AzureManagement {
    async fn namespace_properties(&self) -> ServiceBusResult<NamespaceProperties> {
        let url = format!("{}?api-version={API_VERSION_SERVICE_BUS}", self.namespace_url);
        let response: NamespaceResponse = self.get_json(&url, "get_namespace").await?;
        Ok(NamespaceProperties {
            name: response.name,
            created_at: response.properties.created_at.unwrap_or_default(),
        })
    }

    async fn list_topics(
        &self,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<TopicProperties>> {
        let url = self.list_url("/topics", continuation)?;
        let (items, continuation) = self.get_page::<NamedResource>(&url, "list_topics").await?;
        Ok(Page {
            items: items
                .into_iter()
                .map(|t| TopicProperties { name: t.name })
                .collect(),
            continuation,
        })
    }

    async fn list_subscriptions(
        &self,
        topic: &str,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<SubscriptionProperties>> {
        let relative = format!("/topics/{}/subscriptions", urlencoding::encode(topic));
        let url = self.list_url(&relative, continuation)?;
        let (items, continuation) = self
            .get_page::<CountedResource>(&url, "list_subscriptions")
            .await?;
        Ok(Page {
            items: items
                .into_iter()
                .map(|s| SubscriptionProperties {
                    topic_name: topic.to_string(),
                    name: s.name,
                    runtime: s.properties.count_details.into(),
                })
                .collect(),
            continuation,
        })
    }

    async fn list_queues(
        &self,
        continuation: Option<String>,
    ) -> ServiceBusResult<Page<QueueProperties>> {
        let url = self.list_url("/queues", continuation)?;
        let (items, continuation) = self.get_page::<CountedResource>(&url, "list_queues").await?;
        Ok(Page {
            items: items
                .into_iter()
                .map(|q| QueueProperties {
                    name: q.name,
                    runtime: q.properties.count_details.into(),
                })
                .collect(),
            continuation,
        })
    }

    async fn topic(&self, path: &str) -> ServiceBusResult<TopicProperties> {
        let url = self.url(&format!("/topics/{}", urlencoding::encode(path)));
        let topic: NamedResource = self.get_json(&url, "get_topic").await?;
        Ok(TopicProperties { name: topic.name })
    }

    async fn subscription_runtime(
        &self,
        topic: &str,
        name: &str,
    ) -> ServiceBusResult<SubscriptionProperties> {
        let url = self.url(&format!(
            "/topics/{}/subscriptions/{}",
            urlencoding::encode(topic),
            urlencoding::encode(name)
        ));
        let sub: CountedResource = self.get_json(&url, "get_subscription").await?;
        Ok(SubscriptionProperties {
            topic_name: topic.to_string(),
            name: sub.name,
            runtime: sub.properties.count_details.into(),
        })
    }

    async fn queue_runtime(&self, path: &str) -> ServiceBusResult<QueueProperties> {
        let url = self.url(&format!("/queues/{}", urlencoding::encode(path)));
        let queue: CountedResource = self.get_json(&url, "get_queue").await?;
        log::debug!("Runtime info for queue {} in {}", queue.name, self.namespace);
        Ok(QueueProperties {
            name: queue.name,
            runtime: queue.properties.count_details.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AzureManagement {
        AzureManagement::new(
            reqwest::Client::new(),
            Arc::new(ManagementTokenSource::new(
                reqwest::Client::new(),
                Default::default(),
            )),
            "https://management.azure.com/",
            "sub-id",
            "rg",
            "orders-ns",
            50,
        )
    }

    #[test]
    fn first_page_url_carries_page_size() {
        let url = client().list_url("/queues", None).unwrap();
        assert_eq!(
            url,
            "https://management.azure.com/subscriptions/sub-id/resourceGroups/rg/providers/Microsoft.ServiceBus/namespaces/orders-ns/queues?api-version=2021-11-01&$top=50"
        );
    }

    #[test]
    fn next_link_is_followed_verbatim() {
        let next = "https://management.azure.com/subscriptions/x/queues?$skiptoken=abc".to_string();
        assert_eq!(client().list_url("/queues", Some(next.clone())).unwrap(), next);
    }

    #[test]
    fn foreign_next_link_is_rejected() {
        let err = client()
            .list_url("/queues", Some("https://evil.example/next".into()))
            .unwrap_err();
        assert!(matches!(err, ServiceBusError::ManagementFailed(_)));
    }

    #[test]
    fn list_response_parses_count_details() {
        let json = r#"{
            "value": [
                { "name": "orders", "properties": { "countDetails": { "activeMessageCount": 4, "deadLetterMessageCount": 2 } } },
                { "name": "empty", "properties": {} }
            ],
            "nextLink": null
        }"#;
        let list: ListResponse<CountedResource> = serde_json::from_str(json).unwrap();
        let runtimes: Vec<RuntimeInfo> = list
            .value
            .into_iter()
            .map(|q| q.properties.count_details.into())
            .collect();
        assert_eq!(
            runtimes,
            vec![
                RuntimeInfo { message_count: 4, dlq_count: 2 },
                RuntimeInfo::default()
            ]
        );
        assert!(list.next_link.is_none());
    }
}
