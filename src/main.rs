use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use banklink::oauth::client::TokenClient;
use banklink::store::db::Store;
use banklink::{api, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "banklink=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Cleanup) => {
            let store = connect_store(&cfg).await?;
            let report = jobs::cleanup::run_cleanup(&store).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect_store(cfg: &config::Config) -> anyhow::Result<Store> {
    let store = Store::connect(&cfg.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    Ok(store)
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let store = connect_store(&cfg).await?;

    let token_client = TokenClient::new(
        cfg.endpoints.clone(),
        Duration::from_secs(cfg.upstream_timeout_secs),
    )?;

    let state = Arc::new(AppState::new(store.clone(), token_client));

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        // The operator UI is served from elsewhere during development.
        .layer(CorsLayer::permissive());

    jobs::cleanup::spawn(store, Duration::from_secs(cfg.cleanup_interval_secs));
    tracing::info!(
        "Background cleanup job started (every {}s)",
        cfg.cleanup_interval_secs
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("BankLink gateway listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
