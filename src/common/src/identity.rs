//! Identity provider accounts.
//!
//! Only account removal is needed by this service. "Account not found" is a
//! distinguished outcome so that repeated deletions can treat it as success.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::IdentityConfig;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Account {0} not found")]
    NotFound(String),
    #[error("Identity provider is disabled")]
    Disabled,
    #[error("Identity provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Identity provider returned {status}: {message}")]
    Unexpected { status: u16, message: String },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn delete_account(&self, uid: &str) -> Result<(), IdentityError>;
}

/// Provider used when no identity backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIdentityProvider;

#[async_trait]
impl IdentityProvider for DisabledIdentityProvider {
    async fn delete_account(&self, _uid: &str) -> Result<(), IdentityError> {
        Err(IdentityError::Disabled)
    }
}

/// Process-local account registry
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityProvider {
    accounts: Arc<Mutex<HashSet<String>>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_account(&self, uid: &str) {
        self.accounts.lock().await.insert(uid.to_string());
    }

    pub async fn has_account(&self, uid: &str) -> bool {
        self.accounts.lock().await.contains(uid)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn delete_account(&self, uid: &str) -> Result<(), IdentityError> {
        if self.accounts.lock().await.remove(uid) {
            Ok(())
        } else {
            Err(IdentityError::NotFound(uid.to_string()))
        }
    }
}

/// Client for an identity provider admin API exposing `DELETE /accounts/{uid}`
pub struct HttpIdentityProvider {
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpIdentityProvider {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn delete_account(&self, uid: &str) -> Result<(), IdentityError> {
        let url = format!("{}/accounts/{}", self.endpoint, urlencoding::encode(uid));
        let mut request = self.http.delete(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(IdentityError::NotFound(uid.to_string()));
        }

        let message = resp.text().await.unwrap_or_default();
        Err(IdentityError::Unexpected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Create the identity provider selected by configuration
pub fn create_identity_provider(
    config: &IdentityConfig,
) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    match config.provider.as_str() {
        "none" => Ok(Arc::new(DisabledIdentityProvider)),
        "memory" => Ok(Arc::new(MemoryIdentityProvider::new())),
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .filter(|e| !e.is_empty())
                .ok_or_else(|| anyhow::anyhow!("Identity provider 'http' requires an endpoint"))?;
            Ok(Arc::new(HttpIdentityProvider::new(
                endpoint,
                config.api_key.clone(),
                config.timeout,
            )?))
        }
        other => Err(anyhow::anyhow!(
            "Unsupported identity provider: {other}. Supported: none, memory, http"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::delete,
    };
    use tokio::net::TcpListener;

    async fn fake_admin_api(Path(uid): Path<String>, headers: HeaderMap) -> StatusCode {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "Bearer secret")
            .unwrap_or(false);
        if !authorized {
            return StatusCode::UNAUTHORIZED;
        }
        match uid.as_str() {
            "known" => StatusCode::NO_CONTENT,
            "boom" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::NOT_FOUND,
        }
    }

    async fn spawn_admin_api() -> String {
        let app = Router::new().route("/accounts/:uid", delete(fake_admin_api));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_memory_provider_reports_missing_accounts() {
        let provider = MemoryIdentityProvider::new();
        provider.create_account("u1").await;

        provider.delete_account("u1").await.unwrap();
        assert!(!provider.has_account("u1").await);
        assert!(matches!(
            provider.delete_account("u1").await,
            Err(IdentityError::NotFound(uid)) if uid == "u1"
        ));
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        assert!(matches!(
            DisabledIdentityProvider.delete_account("u1").await,
            Err(IdentityError::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_http_provider_status_mapping() {
        let endpoint = spawn_admin_api().await;
        let provider = HttpIdentityProvider::new(
            &format!("{endpoint}/"),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        provider.delete_account("known").await.unwrap();
        assert!(matches!(
            provider.delete_account("ghost").await,
            Err(IdentityError::NotFound(_))
        ));
        assert!(matches!(
            provider.delete_account("boom").await,
            Err(IdentityError::Unexpected { status: 500, .. })
        ));

        let anonymous =
            HttpIdentityProvider::new(&endpoint, None, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            anonymous.delete_account("known").await,
            Err(IdentityError::Unexpected { status: 401, .. })
        ));
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = IdentityConfig {
            provider: "ldap".to_string(),
            ..IdentityConfig::default()
        };
        assert!(create_identity_provider(&config).is_err());

        let config = IdentityConfig {
            provider: "http".to_string(),
            ..IdentityConfig::default()
        };
        assert!(create_identity_provider(&config).is_err());
    }
}
