//! Integration tests for the token lifecycle core: store validity queries,
//! the rotating-pool and single-token strategies, and the cleanup sweep.
//!
//! Everything runs hermetically: the store is an in-memory SQLite database
//! and provider token endpoints are wiremock.

use std::time::Duration;

use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use banklink::config::ProviderEndpoints;
use banklink::errors::AppError;
use banklink::jobs::cleanup::run_cleanup;
use banklink::oauth::client::TokenClient;
use banklink::pool::{new_pool_id, PoolManager};
use banklink::provider::Provider;
use banklink::store::db::{NewToken, Store};

fn endpoints(base: &str) -> ProviderEndpoints {
    ProviderEndpoints {
        itau_token_url: format!("{base}/api/oauth/token"),
        itau_assertion_url: format!("{base}/as/token.oauth2"),
        inter_token_url: format!("{base}/oauth/v2/token"),
    }
}

fn token_client(base: &str) -> TokenClient {
    TokenClient::new(endpoints(base), Duration::from_secs(5)).unwrap()
}

fn new_token(provider: Provider, client_id: &str, suffix: &str, expires_in: i64, issued_at: i64) -> NewToken {
    NewToken {
        provider,
        client_id: client_id.to_string(),
        access_token: format!("tok-{suffix}"),
        token_type: "Bearer".into(),
        expires_in,
        issued_at,
        pool_id: new_pool_id(provider),
    }
}

async fn seed_credentials(store: &Store, provider: Provider, client_id: &str) {
    store
        .upsert_credential(provider, client_id, "secret", "CERT", "KEY", Utc::now().timestamp())
        .await
        .unwrap();
}

fn itau_token_body(token: &str, expires_in: i64) -> serde_json::Value {
    serde_json::json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    })
}

mod store_validity {
    use super::*;

    /// Boundary from the validity rule: age == expires_in - 31 is valid,
    /// age == expires_in - 30 is not.
    #[tokio::test]
    async fn margin_boundary_is_exact() {
        let store = Store::in_memory().await.unwrap();
        let issued_at = 1_000_000;
        store
            .insert_token(&new_token(Provider::Itau, "c1", "a", 300, issued_at))
            .await
            .unwrap();

        let still_valid = store
            .find_valid_tokens(Provider::Itau, "c1", issued_at + 269)
            .await
            .unwrap();
        assert_eq!(still_valid.len(), 1);

        let at_margin = store
            .find_valid_tokens(Provider::Itau, "c1", issued_at + 270)
            .await
            .unwrap();
        assert!(at_margin.is_empty());
    }

    #[tokio::test]
    async fn ordering_is_least_used_then_least_recent() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        let a = store
            .insert_token(&new_token(Provider::Itau, "c1", "a", 300, now))
            .await
            .unwrap();
        let b = store
            .insert_token(&new_token(Provider::Itau, "c1", "b", 300, now))
            .await
            .unwrap();
        let c = store
            .insert_token(&new_token(Provider::Itau, "c1", "c", 300, now))
            .await
            .unwrap();

        for _ in 0..5 {
            store.record_usage(a.id, now).await.unwrap();
        }
        store.record_usage(b.id, now).await.unwrap();
        for _ in 0..3 {
            store.record_usage(c.id, now).await.unwrap();
        }

        let ordered = store.find_valid_tokens(Provider::Itau, "c1", now).await.unwrap();
        let usage: Vec<i64> = ordered.iter().map(|t| t.usage_count).collect();
        assert_eq!(usage, vec![1, 3, 5]);
        assert_eq!(ordered[0].access_token, "tok-b");
    }
}

mod rotating_pool {
    use super::*;

    #[tokio::test]
    async fn selects_least_used_token_without_calling_the_provider() {
        let server = MockServer::start().await;
        // No mock mounted: any provider call would fail the request.
        let store = Store::in_memory().await.unwrap();
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));
        let now = Utc::now().timestamp();

        let a = store
            .insert_token(&new_token(Provider::Itau, "c1", "a", 300, now))
            .await
            .unwrap();
        let b = store
            .insert_token(&new_token(Provider::Itau, "c1", "b", 300, now))
            .await
            .unwrap();
        let c = store
            .insert_token(&new_token(Provider::Itau, "c1", "c", 300, now))
            .await
            .unwrap();
        for _ in 0..5 {
            store.record_usage(a.id, now).await.unwrap();
        }
        store.record_usage(b.id, now).await.unwrap();
        for _ in 0..3 {
            store.record_usage(c.id, now).await.unwrap();
        }

        let handle = manager.get_usable_token(Provider::Itau, "c1").await.unwrap();
        assert_eq!(handle.access_token, "tok-b");
    }

    #[tokio::test]
    async fn usage_ties_break_on_least_recently_used() {
        let server = MockServer::start().await;
        let store = Store::in_memory().await.unwrap();
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));
        let now = Utc::now().timestamp();

        let older = store
            .insert_token(&new_token(Provider::Itau, "c1", "older", 300, now))
            .await
            .unwrap();
        let newer = store
            .insert_token(&new_token(Provider::Itau, "c1", "newer", 300, now))
            .await
            .unwrap();
        store.record_usage(older.id, now - 50).await.unwrap();
        store.record_usage(newer.id, now - 10).await.unwrap();

        let handle = manager.get_usable_token(Provider::Itau, "c1").await.unwrap();
        assert_eq!(handle.access_token, "tok-older");
    }

    #[tokio::test]
    async fn synthesizes_exactly_one_token_when_pool_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(itau_token_body("fresh", 300)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Itau, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));

        let handle = manager.get_usable_token(Provider::Itau, "c1").await.unwrap();
        assert_eq!(handle.access_token, "fresh");
        assert_eq!(handle.expires_in, 300);

        let now = Utc::now().timestamp();
        assert_eq!(store.count_valid_tokens(Provider::Itau, "c1", now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn synthesis_without_credentials_is_not_found() {
        let server = MockServer::start().await;
        let store = Store::in_memory().await.unwrap();
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));

        let err = manager.get_usable_token(Provider::Itau, "ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn full_pool_is_resource_exhausted_and_inserts_nothing() {
        let server = MockServer::start().await;
        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Itau, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));
        let now = Utc::now().timestamp();

        for i in 0..5 {
            store
                .insert_token(&new_token(Provider::Itau, "c1", &format!("t{i}"), 300, now))
                .await
                .unwrap();
        }

        let err = manager
            .synthesize_token(Provider::Itau, "c1", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResourceExhausted(_)));
        assert_eq!(store.count_valid_tokens(Provider::Itau, "c1", now).await.unwrap(), 5);
    }

    /// Issue once, fetch three times: every fetch reuses the single token
    /// (it stays least-used among one) and the provider is called once.
    #[tokio::test]
    async fn repeated_fetches_reuse_the_pooled_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(itau_token_body("only", 300)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Itau, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));

        let issued = manager.issue_token(Provider::Itau, "c1").await.unwrap();
        assert_eq!(issued.access_token, "only");

        for _ in 0..3 {
            let handle = manager.get_usable_token(Provider::Itau, "c1").await.unwrap();
            assert_eq!(handle.access_token, "only");
            assert!(handle.remaining_secs > 0);
        }

        let now = Utc::now().timestamp();
        let rows = store.find_valid_tokens(Provider::Itau, "c1", now).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].usage_count, 3);
    }

    /// A selected token close to expiry triggers a detached replenishment
    /// that the caller never waits on.
    #[tokio::test]
    async fn low_remaining_lifetime_triggers_background_replenishment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(itau_token_body("refill", 300)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Itau, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));
        let now = Utc::now().timestamp();

        // remaining ~100s: valid, but under the 120s low-water mark
        store
            .insert_token(&new_token(Provider::Itau, "c1", "aging", 300, now - 200))
            .await
            .unwrap();

        let handle = manager.get_usable_token(Provider::Itau, "c1").await.unwrap();
        assert_eq!(handle.access_token, "tok-aging");
        assert!(handle.remaining_secs < 120);

        // Wait for the fire-and-forget synthesis to land.
        let mut valid = 0;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            valid = store
                .count_valid_tokens(Provider::Itau, "c1", Utc::now().timestamp())
                .await
                .unwrap();
            if valid == 2 {
                break;
            }
        }
        assert_eq!(valid, 2);
    }

    #[tokio::test]
    async fn upstream_failure_carries_the_body_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client: bad secret"))
            .mount(&server)
            .await;

        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Itau, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));

        let err = manager.get_usable_token(Provider::Itau, "c1").await.unwrap_err();
        match err {
            AppError::Upstream(body) => assert!(body.contains("invalid_client: bad secret")),
            other => panic!("expected Upstream, got {other:?}"),
        }
    }
}

mod single_token {
    use super::*;

    #[tokio::test]
    async fn read_never_synthesizes_and_fails_when_absent() {
        let server = MockServer::start().await;
        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Inter, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));

        // Credentials exist, but the cache strategy still refuses to issue
        // implicitly from the read path.
        let err = manager.get_usable_token(Provider::Inter, "c1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_cached_token_is_not_found_never_stale() {
        let server = MockServer::start().await;
        let store = Store::in_memory().await.unwrap();
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));
        let now = Utc::now().timestamp();

        store
            .insert_token(&new_token(Provider::Inter, "c1", "stale", 63_072_000, now - 63_072_001))
            .await
            .unwrap();

        let err = manager.get_usable_token(Provider::Inter, "c1").await.unwrap_err();
        match err {
            AppError::NotFound(msg) => assert!(msg.contains("expired")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_cached_token_is_returned_and_usage_recorded() {
        let server = MockServer::start().await;
        let store = Store::in_memory().await.unwrap();
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));
        let now = Utc::now().timestamp();

        store
            .insert_token(&new_token(Provider::Inter, "c1", "live", 63_072_000, now - 100))
            .await
            .unwrap();

        let handle = manager.get_usable_token(Provider::Inter, "c1").await.unwrap();
        assert_eq!(handle.access_token, "tok-live");
        assert!(handle.remaining_secs > 0);

        let row = store
            .most_recent_active_token(Provider::Inter, "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.usage_count, 1);
    }

    /// Inter omits expires_in from the token response; the stored lifetime
    /// must be the provider's fixed two-year default, not zero.
    #[tokio::test]
    async fn missing_expires_in_falls_back_to_provider_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "inter-tok",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Store::in_memory().await.unwrap();
        seed_credentials(&store, Provider::Inter, "c1").await;
        let manager = PoolManager::new(store.clone(), token_client(&server.uri()));

        let handle = manager.issue_token(Provider::Inter, "c1").await.unwrap();
        assert_eq!(handle.expires_in, 63_072_000);
        assert_eq!(handle.token_type, "Bearer");

        let row = store
            .most_recent_active_token(Provider::Inter, "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.expires_in, 63_072_000);
    }
}

mod cleanup_sweep {
    use super::*;

    #[tokio::test]
    async fn expired_tokens_are_deactivated_but_kept_within_retention() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        // Expired ten minutes ago — well inside the one-day retention.
        store
            .insert_token(&new_token(Provider::Itau, "c1", "dead", 300, now - 900))
            .await
            .unwrap();
        store.touch_pool(Provider::Itau, "c1", now).await.unwrap();

        let report = run_cleanup(&store).await;
        assert_eq!(report.itau_tokens_deactivated, 1);
        assert_eq!(report.tokens_purged, 0);
        assert_eq!(report.pools_updated, 1);

        assert!(store
            .most_recent_active_token(Provider::Itau, "c1")
            .await
            .unwrap()
            .is_none());

        // Re-running is idempotent: the row is already inactive.
        let second = run_cleanup(&store).await;
        assert_eq!(second.itau_tokens_deactivated, 0);
        assert_eq!(second.tokens_purged, 0);
    }

    #[tokio::test]
    async fn inactive_rows_older_than_a_day_are_purged() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        store
            .insert_token(&new_token(Provider::Itau, "c1", "ancient", 300, now - 90_000))
            .await
            .unwrap();

        let report = run_cleanup(&store).await;
        assert_eq!(report.itau_tokens_deactivated, 1);
        assert_eq!(report.tokens_purged, 1);

        let remaining = store.find_valid_tokens(Provider::Itau, "c1", now).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn jwt_tokens_are_swept_too() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        store
            .insert_jwt_token(Provider::Itau, "c1", "jwt-tok", "Bearer", 300, now - 900)
            .await
            .unwrap();

        let report = run_cleanup(&store).await;
        assert_eq!(report.jwt_tokens_deactivated, 1);
        assert_eq!(report.jwt_tokens_purged, 0);
    }
}
