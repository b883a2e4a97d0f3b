pub mod audit;
pub mod cli;
pub mod config;
pub mod credential;
pub mod db;
pub mod entities;
pub mod mirror;
pub mod models;
pub mod services;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

pub use config::Config;
use credential::CredentialCodec;
use db::Store;
use mirror::JsonMirror;
pub use services::{AuthError, AuthService, CoreAuthService};
pub use session::SessionState;

pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wires the core together from config: authoritative store, document
/// mirror, and credential codec.
pub async fn bootstrap(config: &Config) -> anyhow::Result<CoreAuthService> {
    let store = Store::with_pool_options(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .context("Failed to connect to the authoritative store")?;

    let mirror = JsonMirror::open(Path::new(&config.mirror.data_dir))
        .await
        .context("Failed to open the document mirror")?;

    let codec = CredentialCodec::new(&config.security)?;

    Ok(CoreAuthService::new(
        store,
        Arc::new(mirror),
        codec,
        config.security.min_password_length,
    ))
}
