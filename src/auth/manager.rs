use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::credentials::CredentialStore;
use super::refresh;
use super::types::{Credential, Grant};
use crate::error::ApiError;

/// Token handed out for one request
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,

    /// An exchange was already attempted on behalf of this request
    pub refresh_spent: bool,
}

/// Authentication manager
/// Owns the live credential, refreshes it and writes it back to the store
pub struct AuthManager {
    /// Current credential
    credential: Arc<RwLock<Credential>>,

    /// Serializes the read-exchange-write sequence
    refresh_lock: Mutex<()>,

    /// HTTP client for token exchanges
    client: Client,

    /// Intuit token endpoint
    token_url: String,

    /// Durable copy of the credential
    store: Arc<dyn CredentialStore>,

    /// Proactive refresh threshold in seconds (default: 300 = 5 minutes)
    refresh_threshold: i64,

    /// Number of completed exchanges
    refresh_count: AtomicU64,
}

impl AuthManager {
    /// Create a new AuthManager
    ///
    /// Tokens found in `store` take precedence over the bootstrap values in
    /// `initial`, since the store is updated on every refresh.
    pub fn new(
        initial: Credential,
        store: Arc<dyn CredentialStore>,
        token_url: impl Into<String>,
        http_timeout: u64,
        refresh_threshold: u64,
    ) -> Result<Self> {
        let mut credential = initial;

        match store.load() {
            Ok(Some(stored)) => {
                tracing::info!("Loaded stored tokens from {}", store.describe());
                credential.apply_stored(stored);
            }
            Ok(None) => {
                tracing::debug!("No stored tokens in {}, using bootstrap values", store.describe());
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read {}: {:#}, using bootstrap values",
                    store.describe(),
                    e
                );
            }
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(http_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            credential: Arc::new(RwLock::new(credential)),
            refresh_lock: Mutex::new(()),
            client,
            token_url: token_url.into(),
            store,
            refresh_threshold: refresh_threshold as i64,
            refresh_count: AtomicU64::new(0),
        })
    }

    /// Snapshot of the live credential
    pub async fn current_credential(&self) -> Credential {
        self.credential.read().await.clone()
    }

    /// Realm identifier
    pub async fn tenant_id(&self) -> String {
        self.credential.read().await.tenant_id.clone()
    }

    /// Number of exchanges performed by this manager
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Check if token is expiring soon (within threshold)
    /// Unknown expiry counts as fresh: the 401 path covers it
    async fn is_token_expiring_soon(&self) -> bool {
        let creds = self.credential.read().await;
        match creds.expires_at {
            None => false,
            Some(exp) => exp <= Utc::now() + Duration::seconds(self.refresh_threshold),
        }
    }

    /// Check if token is actually expired (not just expiring soon)
    async fn is_token_expired(&self) -> bool {
        let creds = self.credential.read().await;
        match creds.expires_at {
            None => false,
            Some(exp) => Utc::now() >= exp,
        }
    }

    /// Get an access token, refreshing first when its known expiry is close
    ///
    /// `refresh_spent` is set when this call attempted an exchange, so the
    /// caller must not refresh again for the same request.
    pub async fn valid_access_token(&self) -> Result<AccessToken, ApiError> {
        if self.is_token_expiring_soon().await {
            let _guard = self.refresh_lock.lock().await;

            // Another caller may have refreshed while we waited for the lock
            if self.is_token_expiring_soon().await {
                let refresh_token = self.credential.read().await.refresh_token.clone();
                match self.exchange_locked(Grant::RefreshToken(refresh_token)).await {
                    Ok(creds) => {
                        return Ok(AccessToken {
                            token: creds.access_token,
                            refresh_spent: true,
                        })
                    }
                    Err(e) => {
                        tracing::error!("Proactive token refresh failed: {}", e);

                        // Graceful degradation: if token isn't actually expired yet, use it
                        if self.is_token_expired().await {
                            return Err(e);
                        }
                        tracing::warn!("Using existing token despite refresh failure (not yet expired)");
                        return Ok(AccessToken {
                            token: self.credential.read().await.access_token.clone(),
                            refresh_spent: true,
                        });
                    }
                }
            }
        }

        Ok(AccessToken {
            token: self.credential.read().await.access_token.clone(),
            refresh_spent: false,
        })
    }

    /// Exchange the current refresh token for a new pair
    pub async fn refresh(&self) -> Result<Credential, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        let refresh_token = self.credential.read().await.refresh_token.clone();
        self.exchange_locked(Grant::RefreshToken(refresh_token))
            .await
    }

    /// Refresh after the provider rejected `rejected_token`
    ///
    /// When another caller already replaced that token while we waited for
    /// the lock, the current credential is returned without a new exchange.
    pub async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<Credential, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.credential.read().await.clone();
        if current.access_token != rejected_token {
            tracing::debug!("Access token already refreshed by another caller");
            return Ok(current);
        }

        self.exchange_locked(Grant::RefreshToken(current.refresh_token))
            .await
    }

    /// Bootstrap the credential from an authorization code
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Credential, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        self.exchange_locked(Grant::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: redirect_uri.to_string(),
        })
        .await
    }

    /// Run an exchange, update the credential and persist it
    /// Caller must hold `refresh_lock`
    async fn exchange_locked(&self, grant: Grant) -> Result<Credential, ApiError> {
        let snapshot = self.credential.read().await.clone();
        let token_data = refresh::exchange(&self.client, &self.token_url, &snapshot, &grant).await?;

        let updated = {
            let mut creds = self.credential.write().await;
            creds.apply_token_data(token_data);
            creds.clone()
        };
        self.refresh_count.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            "Refreshed QBO access token ({}...)",
            updated.access_token_prefix()
        );

        // Best-effort: the in-memory credential stays authoritative for this process
        if let Err(e) = self.store.save(&updated) {
            tracing::warn!(
                "Failed to persist refreshed tokens to {}: {:#}",
                self.store.describe(),
                e
            );
        }

        Ok(updated)
    }
}
