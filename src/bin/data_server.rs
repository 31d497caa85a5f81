//! Data server: stores uploaded recording sessions under one directory per
//! user and serves them back.
//!
//! Usage:
//!   cargo run --bin data-server -- --bind 127.0.0.1:3000 --data-dir ./data
//!
//! Requests must carry the signed-in user in `X-Authenticated-User`, set by
//! the auth gateway in front of this process. Only connections from
//! `--trusted-proxy` addresses (loopback by default) may set it; everyone
//! else gets 403.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use muse_recorder::config::ServerConfig;
use muse_recorder::server;
use muse_recorder::store::DataStore;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();
    let store = DataStore::new(&config.data_dir);
    tokio::fs::create_dir_all(store.root())
        .await
        .with_context(|| format!("creating {}", store.root().display()))?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(
        "Serving {} on http://{} (trusted proxies: {:?})",
        store.root().display(),
        listener.local_addr()?,
        config.trusted_proxies
    );

    let app = server::router(Arc::new(store), &config.trusted_proxies);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
