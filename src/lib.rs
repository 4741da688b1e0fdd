pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

use anyhow::{bail, Context};
use log::{info, warn};
use std::sync::Arc;

// Export API types
pub use api::handlers;
pub use api::routes;
pub use api::{AppState, Engine};

pub use error::{AppError, RouteTableError};

// Export logic types
pub use logic::{
    Pipeline, PipelineInput, PipelineOutput, RouteTable, SessionManager, TransformRegistry,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{FunctionStore, MemoryStore, PostgresStore};

use crate::config::AppConfig;
use crate::logic::{AssetResolver, Layout};

/// Connects to the database, checks the route table against its functions and serves.
pub async fn serve(config: AppConfig, registry: TransformRegistry) -> anyhow::Result<()> {
    use tokio::net::TcpListener;

    let routes = load_routes(&config, &registry)?;

    let mut store = PostgresStore::new(&config.database_url(), config.max_connections()).await?;
    let migrations_dir = &config.database.migrations_dir;
    if migrations_dir.is_dir() {
        let applied = store.migrate(migrations_dir).await?;
        info!("Applied {} migrations from {}", applied, migrations_dir.display());
    }
    let functions_dir = &config.database.functions_dir;
    if functions_dir.is_dir() {
        let installed = store.install_functions(functions_dir).await?;
        info!("Installed {} function files from {}", installed, functions_dir.display());
    }
    let loaded = store.load_catalog().await?;
    info!("Loaded {} data functions", loaded);

    let missing = routes.missing_functions(&store);
    if !missing.is_empty() {
        bail!(
            "routes refer to data functions that do not exist:\n  {}",
            missing.join("\n  ")
        );
    }

    let engine = build_engine(&config, Arc::new(store), routes)?;
    let app = api::routes::create_router().with_state(engine);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("Server running on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn load_routes(config: &AppConfig, registry: &TransformRegistry) -> anyhow::Result<RouteTable> {
    RouteTable::load(&config.routes.file, registry)
        .with_context(|| format!("Failed to load routes from {}", config.routes.file.display()))
}

/// Assembles the shared request state from configuration.
pub fn build_engine<S: FunctionStore + 'static>(
    config: &AppConfig,
    store: Arc<S>,
    routes: RouteTable,
) -> anyhow::Result<AppState<S>> {
    let sessions = SessionManager::new(
        &config.secret_key(),
        config.session.cookie_name.clone(),
        config.session.ttl_seconds,
    );
    let assets = AssetResolver::new(config.assets.root.clone(), config.assets.index.clone());
    let layout = Layout::new(config.server.title.clone()).context("Failed to load the page layout")?;
    Ok(Arc::new(Engine::new(store, routes, sessions, assets, layout)))
}

/// Validates configuration and the route file without touching the database.
///
/// Returns the loaded route table; soft problems are logged as warnings.
pub fn check(config: &AppConfig, registry: &TransformRegistry) -> anyhow::Result<RouteTable> {
    let routes = load_routes(config, registry)?;

    if !config.assets.root.is_dir() {
        warn!("Static root {} does not exist", config.assets.root.display());
    }
    if !config.database.migrations_dir.is_dir() {
        warn!(
            "Migrations directory {} does not exist; no migrations will be applied",
            config.database.migrations_dir.display()
        );
    }
    if !config.database.functions_dir.is_dir() {
        warn!(
            "Functions directory {} does not exist; no functions will be installed",
            config.database.functions_dir.display()
        );
    }
    if config.session.ttl_seconds <= 0 {
        warn!("session.ttl_seconds is {}; every issued session expires immediately", config.session.ttl_seconds);
    }

    Ok(routes)
}
