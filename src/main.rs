use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use mimalloc::MiMalloc;
use scanforge::config::AppConfig;
use scanforge::{routes, AppState};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanforge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let pool = scanforge::db::create_pool(&config.database_url, config.database_max_connections)
        .await?;
    scanforge::db::run_migrations(&pool).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(pool, config)?;

    tracing::info!(host = %addr, "Starting ScanForge API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Build the full application router.
fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/refresh", post(routes::auth::refresh))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/users", post(routes::auth::create_user))
        .route("/auth/me", get(routes::auth::me));

    let scan_routes = Router::new()
        .route(
            "/scans",
            get(routes::scans::list).post(routes::scans::create),
        )
        .route("/scans/{id}", get(routes::scans::get_by_id))
        .route("/scans/{id}/status", get(routes::scans::status))
        .route("/scans/{id}/abort", post(routes::scans::abort))
        .route("/scans/{id}/findings", get(routes::scans::findings));

    Router::new()
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .nest("/api/v1", auth_routes.merge(scan_routes))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}
