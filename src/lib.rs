pub mod api;
pub mod binding;
pub mod config;
pub mod logic;
pub mod mapping;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use binding::{FormBinder, FormModel, PostedValues};
pub use logic::{UpdateError, UpdateOrchestrator, UpdateOutcome};
pub use mapping::{ConfigurationError, MappingEngine, Projection, RelationsConfig};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, Repository, StoreError, UnitOfWork};

use std::sync::Arc;

/// Builds the router with a fresh store, the category relation registry and
/// the mapping table. Relation misconfiguration fails here, before any request.
pub fn build_app(config: &crate::config::AppConfig) -> anyhow::Result<axum::Router> {
    let store = Arc::new(MemoryStore::new());
    if config.store.seed_demo_data {
        seed::load_seed_data(&store);
    }

    let relations = seed::category_relations(store.clone())?;
    let engine = seed::build_engine(&relations, config.mapping.max_option_depth)?;

    let context = Arc::new(api::handlers::AppContext {
        store,
        engine,
        relations,
    });

    Ok(api::routes::create_router().with_state(context))
}

pub async fn run_server(config: &crate::config::AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let app = build_app(config)?;

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Listening on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
