// Token endpoint exchange

use chrono::Utc;
use reqwest::Client;

use super::types::{Credential, Grant, TokenData, TokenResponse};
use crate::error::ApiError;

/// Exchange a grant at the Intuit token endpoint
///
/// The client id and secret go in as HTTP basic auth, the grant as a form body.
/// No retry happens here: a rejected refresh token will not get better.
pub async fn exchange(
    client: &Client,
    token_url: &str,
    creds: &Credential,
    grant: &Grant,
) -> Result<TokenData, ApiError> {
    tracing::info!(grant = grant.name(), "Exchanging token at {}", token_url);

    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .basic_auth(&creds.client_id, Some(&creds.client_secret))
        .form(&grant.form())
        .send()
        .await
        .map_err(|e| ApiError::from_reqwest("Failed to send token request", e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            "Token exchange failed: status={}, body={}",
            status,
            error_text
        );

        // OAuth errors carry error / error_description
        if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
            if let Some(error_code) = error_json.get("error").and_then(|v| v.as_str()) {
                let error_desc = error_json
                    .get("error_description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                tracing::error!(
                    "Token exchange error details: error={}, description={}",
                    error_code,
                    error_desc
                );
            }
        }

        return Err(ApiError::AuthError(format!(
            "token exchange ({}) failed: {} - {}",
            grant.name(),
            status.as_u16(),
            error_text
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::from_reqwest("Failed to read token response", e))?;
    let data: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        ApiError::MalformedResponse(format!("token response is not valid JSON: {}", e))
    })?;

    let token_data = data.into_token_data(Utc::now())?;

    match token_data.expires_at {
        Some(expires_at) => tracing::info!(
            grant = grant.name(),
            "Token exchanged, expires: {}",
            expires_at.to_rfc3339()
        ),
        None => tracing::info!(grant = grant.name(), "Token exchanged"),
    }

    Ok(token_data)
}
