use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::error::ApiError;

/// Where an authenticated read currently stands
#[derive(Debug, Clone, PartialEq)]
enum RetryState {
    /// First request with the current credential
    FirstAttempt,
    /// First request made with a token refreshed ahead of expiry
    RefreshedAttempt { token: String },
    /// Provider rejected `rejected`; exchanging the refresh token
    Refreshing { rejected: String },
    /// Single retry with the refreshed token
    SecondAttempt { token: String },
}

/// Result of one request that did not fail outright
enum Outcome {
    Body(Value),
    Unauthorized(String),
}

/// HTTP client for the QuickBooks company API
///
/// Every read goes through at most one refresh cycle: a 401 on the first
/// attempt refreshes the credential and retries exactly once. A proactive
/// refresh before the first attempt uses up that cycle.
pub struct QboHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Authentication manager
    auth_manager: Arc<AuthManager>,

    /// Company API base, e.g. https://quickbooks.api.intuit.com/v3/company
    base_url: Url,

    /// `minorversion` query parameter sent with every request
    minor_version: String,
}

impl QboHttpClient {
    /// Create a new HTTP client
    pub fn new(
        auth_manager: Arc<AuthManager>,
        base_url: impl Into<String>,
        minor_version: impl Into<String>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url: String = base_url.into();
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid company API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Company API base URL cannot take a path: {}", base_url);
        }

        Ok(Self {
            client,
            auth_manager,
            base_url,
            minor_version: minor_version.into(),
        })
    }

    /// URL of `segments` under the current realm, each segment percent-encoded
    pub async fn company_url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let realm = self.auth_manager.tenant_id().await;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::ConfigError(format!("base URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .push(&realm)
            .extend(segments);
        Ok(url)
    }

    /// Authenticated GET returning the parsed JSON body
    ///
    /// `label` names the report or query in errors and logs.
    pub async fn get_json(
        &self,
        segments: &[&str],
        params: &[(String, String)],
        label: &str,
    ) -> Result<Value, ApiError> {
        let url = self.company_url(segments).await?;
        let url = url.as_str();
        let mut state = RetryState::FirstAttempt;

        loop {
            state = match state {
                RetryState::FirstAttempt => {
                    let access = self.auth_manager.valid_access_token().await.map_err(|e| {
                        tracing::error!(target_name = label, "Token refresh failed: {}", e);
                        ApiError::AuthError(format!("{}: token refresh failed: {}", label, e))
                    })?;
                    if access.refresh_spent {
                        RetryState::RefreshedAttempt {
                            token: access.token,
                        }
                    } else {
                        match self.attempt(url, params, &access.token, label).await? {
                            Outcome::Body(body) => return Ok(body),
                            Outcome::Unauthorized(_) => {
                                tracing::warn!(
                                    target_name = label,
                                    "Received 401, refreshing token and retrying..."
                                );
                                RetryState::Refreshing {
                                    rejected: access.token,
                                }
                            }
                        }
                    }
                }

                RetryState::RefreshedAttempt { token } => {
                    return match self.attempt(url, params, &token, label).await? {
                        Outcome::Body(body) => Ok(body),
                        Outcome::Unauthorized(message) => Err(ApiError::AuthError(format!(
                            "{}: credential rejected after proactive refresh: {}",
                            label, message
                        ))),
                    };
                }

                RetryState::Refreshing { rejected } => {
                    let creds = self
                        .auth_manager
                        .refresh_after_rejection(&rejected)
                        .await
                        .map_err(|e| {
                            tracing::error!(target_name = label, "Token refresh failed: {}", e);
                            ApiError::AuthError(format!("{}: token refresh failed: {}", label, e))
                        })?;
                    RetryState::SecondAttempt {
                        token: creds.access_token,
                    }
                }

                RetryState::SecondAttempt { token } => {
                    return match self.attempt(url, params, &token, label).await? {
                        Outcome::Body(body) => Ok(body),
                        Outcome::Unauthorized(message) => Err(ApiError::AuthError(format!(
                            "{}: credential rejected after refresh: {}",
                            label, message
                        ))),
                    };
                }
            };
        }
    }

    /// Issue one request; non-401 failures become errors
    async fn attempt(
        &self,
        url: &str,
        params: &[(String, String)],
        token: &str,
        label: &str,
    ) -> Result<Outcome, ApiError> {
        tracing::debug!(url = %url, target_name = label, "Sending HTTP request");

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .query(&[("minorversion", self.minor_version.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Network error fetching {}", label);
                ApiError::from_reqwest(label, e)
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "Received HTTP response");

        if status == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            return Ok(Outcome::Unauthorized(message));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                url = %url,
                response_body = %error_text,
                "HTTP error fetching {}",
                label
            );
            return Err(ApiError::ProviderError {
                status: status.as_u16(),
                target: label.to_string(),
                message: error_text,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::from_reqwest(label, e))?;
        let json = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(format!("{}: invalid JSON: {}", label, e)))?;

        Ok(Outcome::Body(json))
    }
}
