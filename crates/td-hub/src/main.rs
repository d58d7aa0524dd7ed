use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapter;
mod api;
mod config;
mod reports;

use adapter::UnifiedQueryAdapter;
use config::Config;
use reports::ReportRunner;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "td-hub",
    version,
    about = "TANDEM unified analytics query service"
)]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "td-hub.toml")]
    config: PathBuf,
}

// =============================================================================
// State
// =============================================================================

pub struct AppState {
    pub adapter: Arc<UnifiedQueryAdapter>,
    pub reports: ReportRunner,
    pub started: Instant,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api::status))
        .route("/api/capabilities", get(api::capabilities))
        .route("/api/query", post(api::run_query))
        .route("/api/tools", get(api::list_tools))
        .route("/api/tools/:name", post(api::call_tool))
        .route("/api/dashboards/:period", get(api::dashboard))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "td_hub=info,td_io=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    config.apply_env(|key| std::env::var(key).ok());

    let adapter = match config.build_adapter() {
        Ok(a) => Arc::new(a),
        Err(e) => {
            tracing::error!("Failed to configure platforms: {}", e);
            std::process::exit(1);
        }
    };
    for platform in adapter.platforms() {
        tracing::info!("platform ready: {}", platform.display_name());
    }

    let state = Arc::new(AppState {
        reports: ReportRunner::new(adapter.clone(), config.site_url().map(str::to_string)),
        adapter,
        started: Instant::now(),
    });

    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("TANDEM listening on http://{}", args.bind);

    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
