use crate::common::{ServiceBusError, ServiceBusResult};
use crate::config::ManagementConfig;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn needs_refresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN >= self.expires_at
    }
}

/// Azure AD client-credential tokens for the Resource Manager API, cached
/// until shortly before expiry.
#[derive(Debug)]
pub struct ManagementTokenSource {
    http: reqwest::Client,
    config: ManagementConfig,
    cached: RwLock<Option<CachedToken>>,
}

impl ManagementTokenSource {
    pub fn new(http: reqwest::Client, config: ManagementConfig) -> Self {
        Self {
            http,
            config,
            cached: RwLock::new(None),
        }
    }

    pub async fn token(&self) -> ServiceBusResult<String> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if !cached.needs_refresh() {
                return Ok(cached.token.clone());
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(cached) = guard.as_ref() {
            if !cached.needs_refresh() {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    async fn request_token(&self) -> ServiceBusResult<CachedToken> {
        let tenant_id = self.config.tenant_id()?;
        let client_id = self.config.client_id()?;
        let client_secret = self.config.client_secret()?;

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_host().trim_end_matches('/'),
            tenant_id
        );
        log::debug!("Requesting management token from {token_url}");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", MANAGEMENT_SCOPE),
        ];

        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ServiceBusError::ConnectionFailed(format!("Failed to request token: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceBusError::Unauthorized(format!(
                "Token request failed: {status} - {error_text}"
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            ServiceBusError::ConnectionFailed(format!("Failed to parse token response: {e}"))
        })?;

        Ok(CachedToken {
            token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in.unwrap_or(3600)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_close_to_expiry_needs_refresh() {
        let soon = CachedToken {
            token: "t".into(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(soon.needs_refresh());

        let later = CachedToken {
            token: "t".into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(!later.needs_refresh());
    }

    #[tokio::test]
    async fn missing_credentials_are_a_configuration_error() {
        let source = ManagementTokenSource::new(
            reqwest::Client::new(),
            ManagementConfig {
                tenant_id: Some("tenant".into()),
                client_id: Some("client".into()),
                client_secret: Some("   ".into()),
                ..Default::default()
            },
        );
        // whitespace-only secret falls back to the environment variable
        if std::env::var("AZURE_AD__CLIENT_SECRET").is_err() {
            assert!(matches!(
                source.token().await,
                Err(ServiceBusError::ConfigurationError(_))
            ));
        }
    }
}
