// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Seconds shaved off provider-reported lifetimes
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// Grant used for a token endpoint exchange
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    /// Initial bootstrap from an authorization code
    AuthorizationCode { code: String, redirect_uri: String },

    /// Renewal with the current refresh token
    RefreshToken(String),
}

impl Grant {
    /// Form body for the token endpoint
    pub fn form(&self) -> Vec<(&'static str, String)> {
        match self {
            Grant::AuthorizationCode { code, redirect_uri } => vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.clone()),
                ("redirect_uri", redirect_uri.clone()),
            ],
            Grant::RefreshToken(token) => vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", token.clone()),
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken(_) => "refresh_token",
        }
    }
}

/// The single live credential for the process
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,

    /// Realm (company) identifier scoping every API call
    pub tenant_id: String,

    /// Access token expiry, when the provider told us
    pub expires_at: Option<DateTime<Utc>>,

    /// Refresh token expiry, when the provider told us
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential from bootstrap values (no known expiry)
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tenant_id: tenant_id.into(),
            expires_at: None,
            refresh_expires_at: None,
        }
    }

    /// Overlay tokens read back from a durable store
    pub fn apply_stored(&mut self, stored: StoredTokens) {
        if !stored.access_token.is_empty() {
            self.access_token = stored.access_token;
        }
        if !stored.refresh_token.is_empty() {
            self.refresh_token = stored.refresh_token;
        }
        if stored.expires_at.is_some() {
            self.expires_at = stored.expires_at;
        }
        if stored.refresh_expires_at.is_some() {
            self.refresh_expires_at = stored.refresh_expires_at;
        }
    }

    /// Apply a token endpoint response in place
    /// A response without refresh_token keeps the prior one
    pub fn apply_token_data(&mut self, data: TokenData) {
        self.access_token = data.access_token;
        if let Some(refresh_token) = data.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = refresh_token;
        }
        self.expires_at = data.expires_at;
        if data.refresh_expires_at.is_some() {
            self.refresh_expires_at = data.refresh_expires_at;
        }
    }

    /// Short token prefix safe for logs
    pub fn access_token_prefix(&self) -> &str {
        self.access_token
            .get(..8)
            .unwrap_or(self.access_token.as_str())
    }
}

/// Tokens as persisted by a credential store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl From<&Credential> for StoredTokens {
    fn from(creds: &Credential) -> Self {
        Self {
            access_token: creds.access_token.clone(),
            refresh_token: creds.refresh_token.clone(),
            expires_at: creds.expires_at,
            refresh_expires_at: creds.refresh_expires_at,
        }
    }
}

/// Token data from an exchange
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

/// Intuit token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub x_refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Convert lifetimes into absolute expiries relative to `now`
    pub fn into_token_data(self, now: DateTime<Utc>) -> Result<TokenData, ApiError> {
        let access_token = self.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            ApiError::MalformedResponse("token response does not contain access_token".to_string())
        })?;

        Ok(TokenData {
            access_token,
            refresh_token: self.refresh_token,
            expires_at: lifetime_to_expiry(now, "expires_in", self.expires_in)?,
            refresh_expires_at: lifetime_to_expiry(
                now,
                "x_refresh_token_expires_in",
                self.x_refresh_token_expires_in,
            )?,
        })
    }
}

/// Absolute expiry for a lifetime in seconds, minus the buffer
fn lifetime_to_expiry(
    now: DateTime<Utc>,
    field: &str,
    secs: Option<i64>,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(secs) = secs else {
        return Ok(None);
    };

    secs.checked_sub(EXPIRY_BUFFER_SECS)
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(Some)
        .ok_or_else(|| {
            ApiError::MalformedResponse(format!("token response {} out of range: {}", field, secs))
        })
}
