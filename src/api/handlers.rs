use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::jobs::cleanup::{self, CleanupReport};
use crate::provider::{Provider, TokenStrategy};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenRequest {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub certificate_content: String,
    pub private_key_content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateJwtTokenRequest {
    pub provider: String,
    pub client_id: String,
    pub private_key_jwt: String,
    pub certificate_content: String,
    pub private_key_content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub generated_at: DateTime<Utc>,
    pub pool_id: String,
    pub strategy: TokenStrategy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub generated_at: DateTime<Utc>,
    pub pool_id: String,
    pub remaining_seconds: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub generated_at: DateTime<Utc>,
    pub is_expired: bool,
    pub remaining_seconds: i64,
    pub pool_id: String,
    pub strategy: TokenStrategy,
}

#[derive(Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

impl ProviderQuery {
    /// Original clients rarely sent the parameter; ITAU is the default.
    fn resolve(&self) -> Result<Provider, AppError> {
        self.provider.as_deref().unwrap_or("ITAU").parse()
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn require_non_empty(fields: &[(&str, &str)]) -> Result<(), AppError> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(AppError::InvalidArgument(format!(
                "field '{name}' is required"
            )));
        }
    }
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /auth/token — persist credentials, perform one provider call, and
/// persist the issued token.
pub async fn generate_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateTokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    // Input checks happen before any storage or network I/O. Cryptographic
    // material is not validated locally: a bad certificate manifests as an
    // upstream auth failure on first use.
    require_non_empty(&[
        ("provider", &req.provider),
        ("clientId", &req.client_id),
        ("clientSecret", &req.client_secret),
        ("certificateContent", &req.certificate_content),
        ("privateKeyContent", &req.private_key_content),
    ])?;
    let provider: Provider = req.provider.parse()?;

    let now = Utc::now().timestamp();
    state
        .store
        .upsert_credential(
            provider,
            &req.client_id,
            &req.client_secret,
            &req.certificate_content,
            &req.private_key_content,
            now,
        )
        .await?;

    let handle = state.pool_manager.issue_token(provider, &req.client_id).await?;

    Ok(Json(TokenResponse {
        access_token: handle.access_token,
        token_type: handle.token_type,
        expires_in: handle.expires_in,
        generated_at: timestamp_to_datetime(handle.issued_at),
        pool_id: handle.pool_id,
        strategy: provider.strategy(),
    }))
}

/// POST /auth/jwt-token — JWT-bearer (mTLS assertion) variant of token
/// issuance, persisted to its own credential/token tables.
pub async fn generate_jwt_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateJwtTokenRequest>,
) -> Result<Json<JwtTokenResponse>, AppError> {
    require_non_empty(&[
        ("provider", &req.provider),
        ("clientId", &req.client_id),
        ("privateKeyJwt", &req.private_key_jwt),
        ("certificateContent", &req.certificate_content),
        ("privateKeyContent", &req.private_key_content),
    ])?;
    let provider: Provider = req.provider.parse()?;

    let now = Utc::now().timestamp();
    state
        .store
        .upsert_jwt_credential(
            provider,
            &req.client_id,
            &req.private_key_jwt,
            &req.certificate_content,
            &req.private_key_content,
            now,
        )
        .await?;

    let raw = state
        .token_client
        .request_token_with_assertion(provider, &req.private_key_jwt)
        .await?;

    state
        .store
        .insert_jwt_token(
            provider,
            &req.client_id,
            &raw.access_token,
            &raw.token_type,
            raw.expires_in,
            now,
        )
        .await?;

    Ok(Json(JwtTokenResponse {
        access_token: raw.access_token,
        token_type: raw.token_type,
        expires_in: raw.expires_in,
        generated_at: timestamp_to_datetime(now),
    }))
}

/// GET /auth/pool/:client_id — fetch a usable token via the provider's
/// pooling strategy.
pub async fn get_pool_token(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<PoolTokenResponse>, AppError> {
    let provider = query.resolve()?;
    let handle = state
        .pool_manager
        .get_usable_token(provider, &client_id)
        .await?;

    Ok(Json(PoolTokenResponse {
        access_token: handle.access_token,
        token_type: handle.token_type,
        expires_in: handle.expires_in,
        generated_at: timestamp_to_datetime(handle.issued_at),
        pool_id: handle.pool_id,
        remaining_seconds: handle.remaining_secs,
    }))
}

/// GET /auth/token/:client_id — read-only diagnostic: the newest active row
/// with an explicit expiry flag, no pooling decisions.
pub async fn inspect_token(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<InspectTokenResponse>, AppError> {
    let provider = query.resolve()?;
    let now = Utc::now().timestamp();

    let Some(row) = state
        .store
        .most_recent_active_token(provider, &client_id)
        .await?
    else {
        return Err(AppError::NotFound(format!(
            "no {provider} token found for client {client_id}"
        )));
    };

    let remaining = row.remaining(now);
    let is_expired = remaining <= 0;
    if !is_expired {
        state.store.record_usage(row.id, now).await?;
    }

    Ok(Json(InspectTokenResponse {
        access_token: row.access_token,
        token_type: row.token_type,
        expires_in: row.expires_in,
        generated_at: timestamp_to_datetime(row.issued_at),
        is_expired,
        remaining_seconds: remaining.max(0),
        pool_id: row.pool_id,
        strategy: provider.strategy(),
    }))
}

/// POST /auth/refresh/:client_id — re-read stored credentials and perform a
/// new provider call unconditionally.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<TokenResponse>, AppError> {
    let provider = query.resolve()?;
    let handle = state.pool_manager.issue_token(provider, &client_id).await?;

    Ok(Json(TokenResponse {
        access_token: handle.access_token,
        token_type: handle.token_type,
        expires_in: handle.expires_in,
        generated_at: timestamp_to_datetime(handle.issued_at),
        pool_id: handle.pool_id,
        strategy: provider.strategy(),
    }))
}

/// POST /internal/cleanup — one maintenance sweep. Never fails: cleanup is
/// best-effort and reports zero-counts on error.
pub async fn run_cleanup(State(state): State<Arc<AppState>>) -> Json<CleanupReport> {
    Json(cleanup::run_cleanup(&state.store).await)
}
