use env_logger::Env;
use mvc_bootstrap::config::AppConfig;
use mvc_bootstrap::run_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{} max_option_depth={} seed_demo_data={}",
        config.server.host,
        config.server.port,
        config.mapping.max_option_depth,
        config.store.seed_demo_data
    );

    run_server(&config).await
}
