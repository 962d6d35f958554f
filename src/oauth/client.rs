//! Outbound OAuth token-endpoint calls.
//!
//! One call in, one token out. Any non-success response is wrapped as
//! `AppError::Upstream` with the body verbatim — retries cost a full OAuth
//! round trip and are the caller's decision, never ours.

use std::time::Duration;

use serde::Deserialize;

use crate::config::ProviderEndpoints;
use crate::errors::AppError;
use crate::provider::Provider;

const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:client_credentials";
const JWT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// What the provider actually returned. `token_type` and `expires_in` are
/// optional on the wire; defaults are filled in before the token leaves this
/// module.
#[derive(Debug, Deserialize)]
struct WireToken {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RawToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl TokenClient {
    pub fn new(endpoints: ProviderEndpoints, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoints })
    }

    /// Client-credentials grant with the stored client secret.
    pub async fn request_token(
        &self,
        provider: Provider,
        client_id: &str,
        client_secret: &str,
    ) -> Result<RawToken, AppError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = provider.scope() {
            form.push(("scope", scope));
        }

        self.post_form(self.endpoints.token_url(provider), &form, provider)
            .await
    }

    /// JWT-bearer grant: the caller supplies a pre-signed client assertion.
    pub async fn request_token_with_assertion(
        &self,
        provider: Provider,
        assertion: &str,
    ) -> Result<RawToken, AppError> {
        let mut form = vec![
            ("grant_type", JWT_GRANT_TYPE),
            ("client_assertion_type", JWT_ASSERTION_TYPE),
            ("client_assertion", assertion),
        ];
        if let Some(scope) = provider.scope() {
            form.push(("scope", scope));
        }

        self.post_form(self.endpoints.assertion_url(provider), &form, provider)
            .await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        provider: Provider,
    ) -> Result<RawToken, AppError> {
        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{provider} token endpoint unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "{provider} token endpoint returned {status}: {body}"
            )));
        }

        let wire: WireToken = resp.json().await.map_err(|e| {
            AppError::Upstream(format!("{provider} token response was not valid JSON: {e}"))
        })?;

        Ok(RawToken {
            access_token: wire.access_token,
            token_type: wire.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: wire
                .expires_in
                .unwrap_or_else(|| provider.default_expires_in()),
        })
    }
}
