//! Durable stores for credentials, issued tokens, and pool descriptors.
//!
//! The database is the only cross-request synchronization point: there is no
//! in-process token cache, so every mutation here is a single-row statement
//! and "now" is always passed in by the caller rather than read from SQL
//! time functions.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::pool::SAFETY_MARGIN_SECS;
use crate::provider::Provider;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub certificate_content: String,
    pub private_key_content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct JwtCredentialRow {
    pub id: i64,
    pub provider: String,
    pub client_id: String,
    pub private_key_jwt: String,
    pub certificate_content: String,
    pub private_key_content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub id: i64,
    pub provider: String,
    pub client_id: String,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub issued_at: i64,
    pub pool_id: String,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used_at: i64,
}

impl TokenRow {
    pub fn remaining(&self, now: i64) -> i64 {
        self.expires_in - (now - self.issued_at)
    }

    /// Usable iff active and more than the safety margin remains: a token
    /// that expires mid-flight is worse than no token.
    pub fn is_valid(&self, now: i64) -> bool {
        self.is_active && self.remaining(now) > SAFETY_MARGIN_SECS
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PoolRow {
    pub id: i64,
    pub provider: String,
    pub client_id: String,
    pub pool_size: i64,
    pub max_pool_size: i64,
    pub last_cleanup_at: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewToken {
    pub provider: Provider,
    pub client_id: String,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub issued_at: i64,
    pub pool_id: String,
}

const TOKEN_COLUMNS: &str = "id, provider, client_id, access_token, token_type, expires_in, issued_at, pool_id, is_active, usage_count, last_used_at";

impl Store {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. Pinned to a single long-lived connection —
    /// every new `:memory:` connection is a fresh empty database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Credential Operations --

    pub async fn upsert_credential(
        &self,
        provider: Provider,
        client_id: &str,
        client_secret: &str,
        certificate_content: &str,
        private_key_content: &str,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO credentials (provider, client_id, client_secret, certificate_content, private_key_content, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
               ON CONFLICT (provider, client_id) DO UPDATE SET
                 client_secret = excluded.client_secret,
                 certificate_content = excluded.certificate_content,
                 private_key_content = excluded.private_key_content,
                 updated_at = excluded.updated_at"#,
        )
        .bind(provider.as_str())
        .bind(client_id)
        .bind(client_secret)
        .bind(certificate_content)
        .bind(private_key_content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_credential(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<Option<CredentialRow>, sqlx::Error> {
        sqlx::query_as::<_, CredentialRow>(
            "SELECT id, provider, client_id, client_secret, certificate_content, private_key_content, created_at, updated_at
             FROM credentials
             WHERE provider = ?1 AND client_id = ?2
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn upsert_jwt_credential(
        &self,
        provider: Provider,
        client_id: &str,
        private_key_jwt: &str,
        certificate_content: &str,
        private_key_content: &str,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO jwt_credentials (provider, client_id, private_key_jwt, certificate_content, private_key_content, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
               ON CONFLICT (provider, client_id) DO UPDATE SET
                 private_key_jwt = excluded.private_key_jwt,
                 certificate_content = excluded.certificate_content,
                 private_key_content = excluded.private_key_content,
                 updated_at = excluded.updated_at"#,
        )
        .bind(provider.as_str())
        .bind(client_id)
        .bind(private_key_jwt)
        .bind(certificate_content)
        .bind(private_key_content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_jwt_credential(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<Option<JwtCredentialRow>, sqlx::Error> {
        sqlx::query_as::<_, JwtCredentialRow>(
            "SELECT id, provider, client_id, private_key_jwt, certificate_content, private_key_content, created_at, updated_at
             FROM jwt_credentials
             WHERE provider = ?1 AND client_id = ?2
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
    }

    // -- Token Operations --

    pub async fn insert_token(&self, token: &NewToken) -> Result<TokenRow, sqlx::Error> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "INSERT INTO tokens (provider, client_id, access_token, token_type, expires_in, issued_at, pool_id, is_active, usage_count, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0, ?6)
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(token.provider.as_str())
        .bind(&token.client_id)
        .bind(&token.access_token)
        .bind(&token.token_type)
        .bind(token.expires_in)
        .bind(token.issued_at)
        .bind(&token.pool_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn insert_jwt_token(
        &self,
        provider: Provider,
        client_id: &str,
        access_token: &str,
        token_type: &str,
        expires_in: i64,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jwt_tokens (provider, client_id, access_token, token_type, expires_in, issued_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .bind(access_token)
        .bind(token_type)
        .bind(expires_in)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Active tokens with more than the safety margin remaining, least-used
    /// and least-recently-used first. The ordering is the load-balancing
    /// policy across pooled tokens.
    pub async fn find_valid_tokens(
        &self,
        provider: Provider,
        client_id: &str,
        now: i64,
    ) -> Result<Vec<TokenRow>, sqlx::Error> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens
             WHERE provider = ?1 AND client_id = ?2 AND is_active = 1
               AND (?3 - issued_at) < expires_in - ?4
             ORDER BY usage_count ASC, last_used_at ASC, id ASC"
        ))
        .bind(provider.as_str())
        .bind(client_id)
        .bind(now)
        .bind(SAFETY_MARGIN_SECS)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_valid_tokens(
        &self,
        provider: Provider,
        client_id: &str,
        now: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tokens
             WHERE provider = ?1 AND client_id = ?2 AND is_active = 1
               AND (?3 - issued_at) < expires_in - ?4",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .bind(now)
        .bind(SAFETY_MARGIN_SECS)
        .fetch_one(&self.pool)
        .await
    }

    /// Newest active row regardless of usage stats; the single-token
    /// strategy and the read-only inspect endpoint both start here.
    pub async fn most_recent_active_token(
        &self,
        provider: Provider,
        client_id: &str,
    ) -> Result<Option<TokenRow>, sqlx::Error> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens
             WHERE provider = ?1 AND client_id = ?2 AND is_active = 1
             ORDER BY issued_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(provider.as_str())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Best-effort usage bookkeeping; validity never depends on it.
    pub async fn record_usage(&self, token_id: i64, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tokens SET usage_count = usage_count + 1, last_used_at = ?2 WHERE id = ?1")
            .bind(token_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn deactivate_expired(
        &self,
        provider: Provider,
        now: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tokens SET is_active = 0
             WHERE provider = ?1 AND is_active = 1 AND (?2 - issued_at) >= expires_in",
        )
        .bind(provider.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn deactivate_expired_jwt(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jwt_tokens SET is_active = 0
             WHERE is_active = 1 AND (?1 - issued_at) >= expires_in",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn purge_inactive_before(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tokens WHERE is_active = 0 AND issued_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn purge_inactive_jwt_before(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jwt_tokens WHERE is_active = 0 AND issued_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // -- Pool Operations --

    /// Lazily creates the pool descriptor with the default 3/5 sizing on
    /// first use for a (provider, client) pair.
    pub async fn get_or_create_pool(
        &self,
        provider: Provider,
        client_id: &str,
        now: i64,
    ) -> Result<PoolRow, sqlx::Error> {
        sqlx::query(
            "INSERT INTO token_pools (provider, client_id, pool_size, max_pool_size, updated_at)
             VALUES (?1, ?2, 3, 5, ?3)
             ON CONFLICT (provider, client_id) DO NOTHING",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, PoolRow>(
            "SELECT id, provider, client_id, pool_size, max_pool_size, last_cleanup_at, updated_at
             FROM token_pools
             WHERE provider = ?1 AND client_id = ?2",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Create-or-bump the pool descriptor (token issuance path).
    pub async fn touch_pool(
        &self,
        provider: Provider,
        client_id: &str,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO token_pools (provider, client_id, pool_size, max_pool_size, updated_at)
             VALUES (?1, ?2, 3, 5, ?3)
             ON CONFLICT (provider, client_id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(provider.as_str())
        .bind(client_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_pools_cleaned(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE token_pools SET last_cleanup_at = ?1, updated_at = ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_boundary_is_exclusive_of_the_margin() {
        let row = TokenRow {
            id: 1,
            provider: "ITAU".into(),
            client_id: "c".into(),
            access_token: "t".into(),
            token_type: "Bearer".into(),
            expires_in: 300,
            issued_at: 1_000,
            pool_id: "itau-x".into(),
            is_active: true,
            usage_count: 0,
            last_used_at: 1_000,
        };

        // age == expires_in - 31 -> valid; age == expires_in - 30 -> invalid
        assert!(row.is_valid(1_269));
        assert!(!row.is_valid(1_270));

        let inactive = TokenRow {
            is_active: false,
            ..row
        };
        assert!(!inactive.is_valid(1_269));
    }
}
