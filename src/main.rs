use pico_db_rust::config::AppConfig;
use pico_db_rust::TransformRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let config = AppConfig::load()?;
    let registry = TransformRegistry::with_builtins();

    match std::env::args().nth(1).as_deref() {
        Some("check") => {
            let routes = pico_db_rust::check(&config, &registry)?;
            println!("Configuration OK: {} routes", routes.len());
            for route in routes.routes() {
                match &route.sql {
                    Some(sql) => println!("  {} {} -> {}", route.method, route.pattern, sql),
                    None => println!("  {} {}", route.method, route.pattern),
                }
            }
            Ok(())
        }
        Some(other) => anyhow::bail!("unknown command '{}', expected 'check' or no command", other),
        None => {
            println!(
                "pico-db-rust: serving {} on {}",
                config.routes.file.display(),
                config.server_address()
            );
            pico_db_rust::serve(config, registry).await
        }
    }
}
