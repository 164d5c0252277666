//! Engine configuration supplied by the hosting application.
//!
//! Every fetch and listing loop in the resource helpers is bounded by one of
//! the limits below. Values are optional in the serialized form so a partial
//! `config.toml` falls back to defaults; [`EngineConfig::validate`] enforces
//! that every effective value is strictly positive and within broker limits.

use crate::utils::env::EnvUtils;
use serde::Deserialize;
use std::time::Duration;

/// Broker hard limit for a single receive/peek batch
pub const SERVICE_BUS_MAX_BATCH_SIZE: u32 = 2048;

/// Upper bound for the per-call receive timeout used by purge/transfer loops
pub const MAX_RECEIVE_TIMEOUT_SECS: u64 = 300;

/// Upper bound for the total number of entities listed per management call
pub const MAX_LIST_FETCH_COUNT: u32 = 10_000;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid {field}: must be greater than zero")]
    Zero { field: &'static str },
    #[error("Invalid {field}: {configured} (limit: {limit})")]
    TooLarge {
        field: &'static str,
        configured: u64,
        limit: u64,
    },
}

impl ConfigValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigValidationError::Zero { field } => format!(
                "{field} must be a positive number.\n\nPlease update {field} in config.toml."
            ),
            ConfigValidationError::TooLarge {
                field,
                configured,
                limit,
            } => format!(
                "{field} is too high!\n\n\
                Your configured value: {configured}\n\
                Maximum allowed: {limit}\n\n\
                Please update {field} in config.toml."
            ),
        }
    }
}

/// Limits that bound every listing, browse and drain loop of the engine.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct EngineConfig {
    topic_list_fetch_count: Option<u32>,
    queue_list_fetch_count: Option<u32>,
    topic_message_fetch_count: Option<u32>,
    queue_message_fetch_count: Option<u32>,
    purge_receive_timeout_secs: Option<u64>,
    management_page_size: Option<u32>,
}

impl EngineConfig {
    /// Builds a configuration where every fetch/list limit has the same value.
    pub fn with_fetch_count(count: u32) -> Self {
        Self {
            topic_list_fetch_count: Some(count),
            queue_list_fetch_count: Some(count),
            topic_message_fetch_count: Some(count),
            queue_message_fetch_count: Some(count),
            purge_receive_timeout_secs: None,
            management_page_size: None,
        }
    }

    pub fn topic_list_fetch_count(&self) -> u32 {
        self.topic_list_fetch_count.unwrap_or(100)
    }

    pub fn queue_list_fetch_count(&self) -> u32 {
        self.queue_list_fetch_count.unwrap_or(100)
    }

    pub fn topic_message_fetch_count(&self) -> u32 {
        self.topic_message_fetch_count.unwrap_or(100)
    }

    pub fn queue_message_fetch_count(&self) -> u32 {
        self.queue_message_fetch_count.unwrap_or(100)
    }

    pub fn purge_receive_timeout_secs(&self) -> u64 {
        self.purge_receive_timeout_secs.unwrap_or(5)
    }

    pub fn purge_receive_timeout(&self) -> Duration {
        Duration::from_secs(self.purge_receive_timeout_secs())
    }

    pub fn management_page_size(&self) -> u32 {
        self.management_page_size.unwrap_or(100)
    }

    pub fn set_topic_list_fetch_count(mut self, count: u32) -> Self {
        self.topic_list_fetch_count = Some(count);
        self
    }

    pub fn set_queue_list_fetch_count(mut self, count: u32) -> Self {
        self.queue_list_fetch_count = Some(count);
        self
    }

    pub fn set_topic_message_fetch_count(mut self, count: u32) -> Self {
        self.topic_message_fetch_count = Some(count);
        self
    }

    pub fn set_queue_message_fetch_count(mut self, count: u32) -> Self {
        self.queue_message_fetch_count = Some(count);
        self
    }

    pub fn set_purge_receive_timeout_secs(mut self, secs: u64) -> Self {
        self.purge_receive_timeout_secs = Some(secs);
        self
    }

    /// Validate the configuration against defined limits
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        let batch_limits = [
            ("topic_message_fetch_count", self.topic_message_fetch_count()),
            ("queue_message_fetch_count", self.queue_message_fetch_count()),
            ("management_page_size", self.management_page_size()),
        ];
        for (field, value) in batch_limits {
            check_range(&mut errors, field, value as u64, SERVICE_BUS_MAX_BATCH_SIZE as u64);
        }

        let list_limits = [
            ("topic_list_fetch_count", self.topic_list_fetch_count()),
            ("queue_list_fetch_count", self.queue_list_fetch_count()),
        ];
        for (field, value) in list_limits {
            check_range(&mut errors, field, value as u64, MAX_LIST_FETCH_COUNT as u64);
        }

        check_range(
            &mut errors,
            "purge_receive_timeout_secs",
            self.purge_receive_timeout_secs(),
            MAX_RECEIVE_TIMEOUT_SECS,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_range(
    errors: &mut Vec<ConfigValidationError>,
    field: &'static str,
    value: u64,
    limit: u64,
) {
    if value == 0 {
        errors.push(ConfigValidationError::Zero { field });
    } else if value > limit {
        errors.push(ConfigValidationError::TooLarge {
            field,
            configured: value,
            limit,
        });
    }
}

/// Azure Resource Manager settings used by the management plane.
///
/// The management listing (topics, subscriptions, queues and their runtime
/// counts) goes through Azure Resource Manager, which needs a service
/// principal and the subscription/resource group that own the namespace.
/// The client secret may be left out of the file and supplied through the
/// `AZURE_AD__CLIENT_SECRET` environment variable instead.
#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
pub struct ManagementConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub authority_host: Option<String>,
    pub management_endpoint: Option<String>,
}

impl ManagementConfig {
    pub fn tenant_id(&self) -> Result<String, crate::ServiceBusError> {
        required(&self.tenant_id, "AZURE_AD__TENANT_ID")
    }

    pub fn client_id(&self) -> Result<String, crate::ServiceBusError> {
        required(&self.client_id, "AZURE_AD__CLIENT_ID")
    }

    pub fn client_secret(&self) -> Result<String, crate::ServiceBusError> {
        required(&self.client_secret, "AZURE_AD__CLIENT_SECRET")
    }

    pub fn subscription_id(&self) -> Result<String, crate::ServiceBusError> {
        required(&self.subscription_id, "AZURE_AD__SUBSCRIPTION_ID")
    }

    pub fn resource_group(&self) -> Result<String, crate::ServiceBusError> {
        required(&self.resource_group, "AZURE_AD__RESOURCE_GROUP")
    }

    pub fn authority_host(&self) -> &str {
        self.authority_host
            .as_deref()
            .unwrap_or("https://login.microsoftonline.com")
    }

    pub fn management_endpoint(&self) -> &str {
        self.management_endpoint
            .as_deref()
            .unwrap_or("https://management.azure.com")
    }
}

/// Configured value first, then the named environment variable.
fn required(value: &Option<String>, env_name: &str) -> Result<String, crate::ServiceBusError> {
    if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    EnvUtils::get_validated_var(env_name).map_err(|e| {
        crate::ServiceBusError::ConfigurationError(format!(
            "{env_name} is required but not found in configuration or environment: {e}"
        ))
    })
}
