//! Token acquisition strategies.
//!
//! One interface, two behaviors: Itau tokens live for minutes, so valid
//! tokens are kept in a rotating pool and handed out least-used-first; Inter
//! tokens live for years, so the newest cached row is served and a read
//! never triggers an OAuth round trip.

use chrono::Utc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::oauth::client::TokenClient;
use crate::provider::{Provider, TokenStrategy};
use crate::store::db::{NewToken, Store, TokenRow};

/// Buffer subtracted from the declared lifetime before a token counts as
/// usable, so we never hand out a token that expires mid-flight.
pub const SAFETY_MARGIN_SECS: i64 = 30;
/// Remaining lifetime below which a background replenishment is kicked off.
pub const LOW_WATER_MARK_SECS: i64 = 120;
/// Replenish only while fewer than this many valid tokens exist.
pub const REPLENISH_THRESHOLD: usize = 3;

/// A usable token as handed to callers, with its remaining lifetime computed
/// at selection time.
#[derive(Debug, Clone)]
pub struct TokenHandle {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub issued_at: i64,
    pub pool_id: String,
    pub remaining_secs: i64,
}

impl TokenHandle {
    fn from_row(row: TokenRow, now: i64) -> Self {
        let remaining = row.remaining(now);
        Self {
            access_token: row.access_token,
            token_type: row.token_type,
            expires_in: row.expires_in,
            issued_at: row.issued_at,
            pool_id: row.pool_id,
            remaining_secs: remaining,
        }
    }
}

#[derive(Clone)]
pub struct PoolManager {
    store: Store,
    client: TokenClient,
}

impl PoolManager {
    pub fn new(store: Store, client: TokenClient) -> Self {
        Self { store, client }
    }

    /// Provider-agnostic entry point: callers get a usable token without
    /// knowing which strategy produced it.
    pub async fn get_usable_token(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<TokenHandle, AppError> {
        match provider.strategy() {
            TokenStrategy::Pool => self.get_pool_token(provider, client_id).await,
            TokenStrategy::Single => self.get_cached_token(provider, client_id).await,
        }
    }

    /// Unconditional issuance: read stored credentials, one provider call,
    /// persist. Backs both the initial-token and force-refresh endpoints.
    pub async fn issue_token(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<TokenHandle, AppError> {
        let now = Utc::now().timestamp();
        let row = self.acquire_new(provider, client_id, now).await?;
        if provider.strategy() == TokenStrategy::Pool {
            self.store.touch_pool(provider, client_id, now).await?;
        }
        Ok(TokenHandle::from_row(row, now))
    }

    /// Capacity-checked issuance for the rotating pool. The valid-token
    /// count is re-read right before inserting so concurrent callers cap
    /// overshoot at `max_pool_size`.
    pub async fn synthesize_token(
        &self,
        provider: Provider,
        client_id: &str,
        now: i64,
    ) -> Result<TokenRow, AppError> {
        let pool = self.store.get_or_create_pool(provider, client_id, now).await?;
        let current = self.store.count_valid_tokens(provider, client_id, now).await?;
        if current >= pool.max_pool_size {
            return Err(AppError::ResourceExhausted(format!(
                "{provider} token pool for client {client_id} is exhausted, retry shortly"
            )));
        }

        self.acquire_new(provider, client_id, now).await
    }

    async fn get_pool_token(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<TokenHandle, AppError> {
        let now = Utc::now().timestamp();
        let valid = self.store.find_valid_tokens(provider, client_id, now).await?;
        let valid_count = valid.len();

        let selected = match valid.into_iter().next() {
            Some(row) => row,
            None => self.synthesize_token(provider, client_id, now).await?,
        };

        self.store.record_usage(selected.id, now).await?;
        let remaining = selected.remaining(now);

        // Detached replenishment: the read path never waits on an OAuth
        // round trip, and a failed refresh only reaches the log sink.
        if remaining < LOW_WATER_MARK_SECS && valid_count < REPLENISH_THRESHOLD {
            let manager = self.clone();
            let client_id = client_id.to_string();
            tokio::spawn(async move {
                let now = Utc::now().timestamp();
                if let Err(e) = manager.synthesize_token(provider, &client_id, now).await {
                    tracing::warn!(%provider, %client_id, "background token replenishment failed: {e}");
                }
            });
        }

        Ok(TokenHandle::from_row(selected, now))
    }

    /// Long-lived-token strategy: serve the newest cached row or tell the
    /// caller to regenerate. Synthesis costs a full OAuth round trip, so it
    /// is never triggered implicitly from this read path.
    async fn get_cached_token(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<TokenHandle, AppError> {
        let now = Utc::now().timestamp();
        let Some(row) = self
            .store
            .most_recent_active_token(provider, client_id)
            .await?
        else {
            return Err(AppError::NotFound(format!(
                "no {provider} token found for client {client_id}; generate a token first"
            )));
        };

        if row.remaining(now) <= 0 {
            return Err(AppError::NotFound(format!(
                "{provider} token for client {client_id} has expired; generate a new one"
            )));
        }

        self.store.record_usage(row.id, now).await?;
        Ok(TokenHandle::from_row(row, now))
    }

    async fn acquire_new(
        &self,
        provider: Provider,
        client_id: &str,
        now: i64,
    ) -> Result<TokenRow, AppError> {
        let cred = self
            .store
            .latest_credential(provider, client_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no {provider} credentials stored for client {client_id}; generate credentials first"
                ))
            })?;

        let raw = self
            .client
            .request_token(provider, client_id, &cred.client_secret)
            .await?;

        let row = self
            .store
            .insert_token(&NewToken {
                provider,
                client_id: client_id.to_string(),
                access_token: raw.access_token,
                token_type: raw.token_type,
                expires_in: raw.expires_in,
                issued_at: now,
                pool_id: new_pool_id(provider),
            })
            .await?;

        Ok(row)
    }
}

/// Opaque tag grouping tokens issued together, for bookkeeping and display.
pub fn new_pool_id(provider: Provider) -> String {
    format!("{}-{}", provider.slug(), Uuid::new_v4().simple())
}
