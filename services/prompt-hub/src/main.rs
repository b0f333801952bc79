use std::sync::Arc;

use prompt_hub::api::{self, AppState};
use prompt_hub::schema::ensure_schema;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use shared::config::Settings;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging via RUST_LOG
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Settings::new().unwrap_or_else(|e| {
        warn!(%e, "invalid settings, using defaults");
        Settings::default()
    });

    let mut options = ConnectOptions::new(settings.connection_url());
    options.sqlx_logging(false);
    let db: Arc<DatabaseConnection> = Arc::new(Database::connect(options).await?);

    if settings.ensure_schema {
        ensure_schema(&db).await?;
    }

    let app = api::router(AppState {
        db: db.clone(),
        max_page_size: settings.max_page_size,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    info!("starting prompt-hub on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
