use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod agent;
mod db;
mod feed;
mod google_client;
mod handlers;
mod middleware;
mod models;
mod store;
mod surface;

use agent::{AgentBackend, HttpAgentBackend};
use feed::MessageFeed;
use store::{DocumentStore, PgDocumentStore};

// Shared application state: the database pool, the document store and
// live feed built on it, and the downstream agent backend client.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub store: Arc<dyn DocumentStore>,
    pub agent: Arc<dyn AgentBackend>,
    pub feed: MessageFeed,
    pub google_oauth_client_id: Option<String>,
    pub google_oauth_client_secret: Option<String>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    let feed = MessageFeed::new();
    let store: Arc<dyn DocumentStore> =
        Arc::new(PgDocumentStore::new(db_pool.clone(), feed.clone()));

    let agent_backend = HttpAgentBackend::from_env();
    tracing::info!("Agent backend configured");
    let agent: Arc<dyn AgentBackend> = Arc::new(agent_backend);

    // Google OAuth is optional; without credentials only email/password
    // sign-in is available.
    let google_oauth_client_id = std::env::var("GOOGLE_OAUTH_CLIENT_ID").ok();
    let google_oauth_client_secret = std::env::var("GOOGLE_OAUTH_CLIENT_SECRET").ok();
    if google_oauth_client_id.is_some() && google_oauth_client_secret.is_some() {
        tracing::info!("Google OAuth credentials loaded");
    } else {
        tracing::warn!("Google OAuth credentials not complete. Sign in with Google disabled.");
    }

    let shared_state = Arc::new(AppState {
        db_pool,
        store,
        agent,
        feed,
        google_oauth_client_id,
        google_oauth_client_secret,
    });

    let app = Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::preferences::preferences_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("Failed to bind 0.0.0.0:3000");
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .await
        .expect("Server error");
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,agent_chat=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,agent_chat=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON logging for aggregation in production, human-readable otherwise.
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("agent_chat starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) { "development" } else { "production" }
    );

    Ok(())
}

async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let google_status = if state.google_oauth_client_id.is_some() {
        "configured"
    } else {
        "not_configured"
    };

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "google_oauth": google_status,
        },
        "endpoints": {
            "status": "/api/status",
            "websocket": "/ws",
            "auth": "/api/auth/*",
            "chat": "/api/chat",
            "history": "/api/chat/history",
            "preferences": "/api/preferences"
        }
    }))
}
