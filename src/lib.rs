//! BankLink — library crate for integration testing.
//!
//! The binary in `main.rs` wires the same modules; integration tests in
//! `tests/` build the router and components directly from here.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod oauth;
pub mod pool;
pub mod provider;
pub mod store;

use oauth::client::TokenClient;
use pool::PoolManager;
use store::db::Store;

/// Shared application state passed to handlers.
pub struct AppState {
    pub store: Store,
    pub token_client: TokenClient,
    pub pool_manager: PoolManager,
}

impl AppState {
    pub fn new(store: Store, token_client: TokenClient) -> Self {
        let pool_manager = PoolManager::new(store.clone(), token_client.clone());
        Self {
            store,
            token_client,
            pool_manager,
        }
    }
}
