use std::fmt;

/// Engine-wide error taxonomy.
///
/// Variants fall into three groups that callers treat differently:
///
/// - **Connection errors** ([`InvalidConnectionString`], [`Unauthorized`],
///   [`ConnectionFailed`]) are shown to the user as distinct categories and
///   are never retried automatically.
/// - **Destructive-operation errors** (receive/send/complete/dead-letter
///   failures) propagate to the coordinator, which reports them and leaves
///   local counts untouched.
/// - Browse failures never reach this type: the resource helpers log them
///   and degrade to an empty page.
///
/// [`InvalidConnectionString`]: ServiceBusError::InvalidConnectionString
/// [`Unauthorized`]: ServiceBusError::Unauthorized
/// [`ConnectionFailed`]: ServiceBusError::ConnectionFailed
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceBusError {
    /// Azure Resource Manager error with full context
    AzureApiError {
        code: String,               // Azure error code (e.g., "NamespaceNotFound")
        status_code: u16,           // HTTP status code
        message: String,            // Human-readable error message
        request_id: Option<String>, // Azure request ID for tracking
        operation: String,          // Operation that failed (e.g., "list_topics")
    },

    /// Connection related errors
    InvalidConnectionString(String),
    Unauthorized(String),
    ConnectionFailed(String),
    DuplicateConnection(String),

    /// Management listing or runtime-info call failed
    ManagementFailed(String),

    /// Handle creation errors
    ReceiverCreationFailed(String),
    SenderCreationFailed(String),

    /// Message operation errors
    MessageReceiveFailed(String),
    MessageSendFailed(String),
    MessageCompleteFailed(String),
    MessageDeadLetterFailed(String),
    MessageNotFound { path: String, sequence: i64 },

    /// Entity errors
    EntityNotFound(String),
    NothingSelected(String),

    /// Configuration errors
    ConfigurationError(String),
    InvalidConfiguration(String),

    /// Timeout errors
    OperationTimeout(String),

    /// Generic errors
    InternalError(String),
}

impl fmt::Display for ServiceBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceBusError::AzureApiError {
                code,
                status_code,
                message,
                request_id,
                operation,
            } => {
                write!(
                    f,
                    "Azure API error during {operation}: {code} (HTTP {status_code}) - {message}"
                )?;
                if let Some(req_id) = request_id {
                    write!(f, " [Request ID: {req_id}]")?;
                }
                Ok(())
            }
            ServiceBusError::InvalidConnectionString(msg) => {
                write!(f, "The connection string is invalid: {msg}")
            }
            ServiceBusError::Unauthorized(msg) => {
                write!(f, "Unable to connect to Service Bus; unauthorized: {msg}")
            }
            ServiceBusError::ConnectionFailed(msg) => {
                write!(f, "Unable to connect to Service Bus; {msg}")
            }
            ServiceBusError::DuplicateConnection(msg) => {
                write!(f, "This connection is already open: {msg}")
            }
            ServiceBusError::ManagementFailed(msg) => {
                write!(f, "Management operation failed: {msg}")
            }

            ServiceBusError::ReceiverCreationFailed(msg) => {
                write!(f, "Receiver creation failed: {msg}")
            }
            ServiceBusError::SenderCreationFailed(msg) => {
                write!(f, "Sender creation failed: {msg}")
            }

            ServiceBusError::MessageReceiveFailed(msg) => {
                write!(f, "Message receive failed: {msg}")
            }
            ServiceBusError::MessageSendFailed(msg) => write!(f, "Message send failed: {msg}"),
            ServiceBusError::MessageCompleteFailed(msg) => {
                write!(f, "Message complete failed: {msg}")
            }
            ServiceBusError::MessageDeadLetterFailed(msg) => {
                write!(f, "Message dead letter failed: {msg}")
            }
            ServiceBusError::MessageNotFound { path, sequence } => {
                write!(f, "Message with sequence number {sequence} not found in {path}")
            }

            ServiceBusError::EntityNotFound(path) => write!(f, "Entity not found: {path}"),
            ServiceBusError::NothingSelected(msg) => write!(f, "Nothing selected: {msg}"),

            ServiceBusError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            ServiceBusError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {msg}")
            }

            ServiceBusError::OperationTimeout(msg) => write!(f, "Operation timeout: {msg}"),

            ServiceBusError::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServiceBusError {}

impl ServiceBusError {
    /// Create an Azure API error with full context
    pub fn azure_api_error(
        operation: impl Into<String>,
        code: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::AzureApiError {
            code: code.into(),
            status_code,
            message: message.into(),
            request_id: None,
            operation: operation.into(),
        }
    }

    /// Extract Azure error details from a failed management response.
    ///
    /// 401 and 403 map to [`ServiceBusError::Unauthorized`] so they surface
    /// as a connection-level category; 404 maps to
    /// [`ServiceBusError::EntityNotFound`].
    pub async fn from_azure_response(
        response: reqwest::Response,
        operation: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let status_code = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-ms-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<AzureErrorResponse>(&body) {
            Ok(azure_error) => (azure_error.error.code, azure_error.error.message),
            Err(_) if body.is_empty() => {
                (format!("HTTP_{status_code}"), format!("HTTP {status_code} error"))
            }
            Err(_) => (format!("HTTP_{status_code}"), body),
        };

        match status_code {
            401 | 403 => Self::Unauthorized(format!("{operation}: {message}")),
            404 => Self::EntityNotFound(format!("{operation}: {message}")),
            _ => Self::AzureApiError {
                code,
                status_code,
                message,
                request_id,
                operation,
            },
        }
    }

    /// Connection-level failures: bad connection string, bad credentials or a
    /// broker that cannot be reached at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ServiceBusError::InvalidConnectionString(_)
                | ServiceBusError::Unauthorized(_)
                | ServiceBusError::ConnectionFailed(_)
        )
    }

    /// Get the Azure error code if this is an Azure API error
    pub fn azure_error_code(&self) -> Option<&str> {
        match self {
            ServiceBusError::AzureApiError { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Short, user-facing text for error notifications.
    pub fn user_message(&self) -> String {
        match self {
            ServiceBusError::InvalidConnectionString(_) => {
                "The connection string is invalid.".to_string()
            }
            ServiceBusError::Unauthorized(_) => {
                "Unable to connect to Service Bus; unauthorized.".to_string()
            }
            ServiceBusError::DuplicateConnection(_) => {
                "This connection is already open.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Azure API error response format
#[derive(Debug, serde::Deserialize)]
struct AzureErrorResponse {
    error: AzureErrorDetails,
}

#[derive(Debug, serde::Deserialize)]
struct AzureErrorDetails {
    code: String,
    message: String,
}

impl From<azure_core::Error> for ServiceBusError {
    fn from(err: azure_core::Error) -> Self {
        let text = err.to_string();
        if text.to_lowercase().contains("unauthorized") {
            ServiceBusError::Unauthorized(text)
        } else {
            ServiceBusError::ConnectionFailed(text)
        }
    }
}

impl From<crate::utils::env::EnvVarError> for ServiceBusError {
    fn from(err: crate::utils::env::EnvVarError) -> Self {
        ServiceBusError::ConfigurationError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServiceBusError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ServiceBusError::OperationTimeout(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceBusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceBusError::OperationTimeout(err.to_string())
        } else {
            ServiceBusError::ConnectionFailed(err.to_string())
        }
    }
}

// Result type alias for convenience
pub type ServiceBusResult<T> = Result<T, ServiceBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_classified() {
        assert!(ServiceBusError::InvalidConnectionString("x".into()).is_connection_error());
        assert!(ServiceBusError::Unauthorized("x".into()).is_connection_error());
        assert!(ServiceBusError::ConnectionFailed("x".into()).is_connection_error());
        assert!(!ServiceBusError::MessageSendFailed("x".into()).is_connection_error());
        assert!(!ServiceBusError::DuplicateConnection("x".into()).is_connection_error());
    }

    #[test]
    fn user_message_is_short_for_connection_categories() {
        assert_eq!(
            ServiceBusError::Unauthorized("401 from broker".into()).user_message(),
            "Unable to connect to Service Bus; unauthorized."
        );
        assert_eq!(
            ServiceBusError::InvalidConnectionString("missing Endpoint".into()).user_message(),
            "The connection string is invalid."
        );
    }

    #[test]
    fn azure_api_error_display_includes_request_id() {
        let err = ServiceBusError::AzureApiError {
            code: "Conflict".into(),
            status_code: 409,
            message: "busy".into(),
            request_id: Some("abc".into()),
            operation: "list_topics".into(),
        };
        assert_eq!(
            err.to_string(),
            "Azure API error during list_topics: Conflict (HTTP 409) - busy [Request ID: abc]"
        );
        assert_eq!(err.azure_error_code(), Some("Conflict"));
    }
}
