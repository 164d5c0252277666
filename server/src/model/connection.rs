use crate::common::{ServiceBusError, ServiceBusResult};
use serde::{Deserialize, Serialize};

/// How the engine authenticates against a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CredentialMode {
    /// Shared access key embedded in the connection string
    #[default]
    SharedKey,
    /// Managed/workload identity; the connection string only names the namespace
    ManagedIdentity,
}

/// An opaque connection string plus the credential mode it is used with.
///
/// Two descriptors are the same connection when both the string and the
/// identity flag match; the coordinator uses this to reject duplicates
/// before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub connection_string: String,
    #[serde(default)]
    pub use_managed_identity: bool,
}

impl ConnectionDescriptor {
    pub fn new(connection_string: impl Into<String>, use_managed_identity: bool) -> Self {
        Self {
            connection_string: connection_string.into(),
            use_managed_identity,
        }
    }

    pub fn credential_mode(&self) -> CredentialMode {
        if self.use_managed_identity {
            CredentialMode::ManagedIdentity
        } else {
            CredentialMode::SharedKey
        }
    }

    /// Connection string with the shared access key masked, safe for logs.
    pub fn redacted(&self) -> String {
        self.connection_string
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .map(|part| match part.trim().split_once('=') {
                Some((key, _)) if key.eq_ignore_ascii_case("SharedAccessKey") => {
                    format!("{key}=***")
                }
                _ => part.trim().to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Parsed form of a Service Bus connection string.
///
/// ```text
/// Endpoint=sb://<namespace>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>
/// ```
///
/// In managed-identity mode only the endpoint is required, and a bare host
/// name (`<namespace>.servicebus.windows.net`) is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: String,
    pub namespace: String,
    pub shared_access_key_name: Option<String>,
    pub shared_access_key: Option<String>,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    pub fn parse(descriptor: &ConnectionDescriptor) -> ServiceBusResult<Self> {
        let value = descriptor.connection_string.trim();
        if value.is_empty() {
            return Err(ServiceBusError::InvalidConnectionString(
                "Connection string cannot be empty".to_string(),
            ));
        }

        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        if descriptor.use_managed_identity && !value.contains('=') {
            endpoint = Some(value.to_string());
        } else {
            for part in value.split(';') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }

                let Some((name, val)) = part.split_once('=') else {
                    return Err(ServiceBusError::InvalidConnectionString(format!(
                        "Malformed segment '{part}'"
                    )));
                };
                match name.trim() {
                    n if n.eq_ignore_ascii_case("Endpoint") => endpoint = Some(val.to_string()),
                    n if n.eq_ignore_ascii_case("SharedAccessKeyName") => {
                        key_name = Some(val.to_string())
                    }
                    n if n.eq_ignore_ascii_case("SharedAccessKey") => key = Some(val.to_string()),
                    n if n.eq_ignore_ascii_case("EntityPath") => {
                        entity_path = Some(val.to_string())
                    }
                    other => {
                        log::debug!("Ignoring connection string segment '{other}'");
                    }
                }
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            ServiceBusError::InvalidConnectionString(
                "Missing Endpoint in connection string".to_string(),
            )
        })?;
        let namespace = namespace_from_endpoint(&endpoint).ok_or_else(|| {
            ServiceBusError::InvalidConnectionString(format!(
                "Cannot determine namespace from endpoint '{endpoint}'"
            ))
        })?;

        if !descriptor.use_managed_identity {
            if key_name.is_none() {
                return Err(ServiceBusError::InvalidConnectionString(
                    "Missing SharedAccessKeyName in connection string".to_string(),
                ));
            }
            if key.is_none() {
                return Err(ServiceBusError::InvalidConnectionString(
                    "Missing SharedAccessKey in connection string".to_string(),
                ));
            }
        }

        Ok(Self {
            endpoint,
            namespace,
            shared_access_key_name: key_name,
            shared_access_key: key,
            entity_path,
        })
    }

    /// Fully qualified host name, e.g. `ns.servicebus.windows.net`.
    pub fn host(&self) -> &str {
        let without_scheme = self
            .endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint);
        without_scheme.trim_end_matches('/')
    }
}

fn namespace_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let namespace = host.split('.').next()?.trim_end_matches('/');
    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "Endpoint=sb://orders-ns.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0";

    #[test]
    fn parses_shared_key_connection_string() {
        let parsed = ConnectionString::parse(&ConnectionDescriptor::new(VALID, false)).unwrap();
        assert_eq!(parsed.namespace, "orders-ns");
        assert_eq!(parsed.host(), "orders-ns.servicebus.windows.net");
        assert_eq!(
            parsed.shared_access_key_name.as_deref(),
            Some("RootManageSharedAccessKey")
        );
        assert_eq!(parsed.shared_access_key.as_deref(), Some("c2VjcmV0"));
    }

    #[test]
    fn missing_key_is_invalid_in_shared_key_mode() {
        let descriptor = ConnectionDescriptor::new(
            "Endpoint=sb://orders-ns.servicebus.windows.net/;SharedAccessKeyName=Root",
            false,
        );
        assert!(matches!(
            ConnectionString::parse(&descriptor),
            Err(ServiceBusError::InvalidConnectionString(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let descriptor = ConnectionDescriptor::new("not a connection string", false);
        let err = ConnectionString::parse(&descriptor).unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.user_message(), "The connection string is invalid.");
    }

    #[test]
    fn managed_identity_accepts_bare_host() {
        let descriptor = ConnectionDescriptor::new("orders-ns.servicebus.windows.net", true);
        let parsed = ConnectionString::parse(&descriptor).unwrap();
        assert_eq!(parsed.namespace, "orders-ns");
        assert!(parsed.shared_access_key.is_none());
    }

    #[test]
    fn descriptor_equality_includes_identity_flag() {
        assert_eq!(
            ConnectionDescriptor::new(VALID, false),
            ConnectionDescriptor::new(VALID, false)
        );
        assert_ne!(
            ConnectionDescriptor::new(VALID, false),
            ConnectionDescriptor::new(VALID, true)
        );
    }

    #[test]
    fn redacted_hides_key() {
        let redacted = ConnectionDescriptor::new(VALID, false).redacted();
        assert!(redacted.contains("SharedAccessKey=***"));
        assert!(!redacted.contains("c2VjcmV0"));
    }
}
