mod sweep;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::require_auth;
use parley_api::state::{AppState, AppStateInner};
use parley_api::{conversations, messages, presence, reactions, typing, users, webhook};
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let webhook_secret = std::env::var("PARLEY_WEBHOOK_SECRET").ok();
    let legacy_direct_keys = std::env::var("PARLEY_LEGACY_DIRECT_KEYS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret,
        webhook_secret,
        legacy_direct_keys,
    });

    // Background sweeps
    tokio::spawn(sweep::run_presence_sweep(
        db.clone(),
        dispatcher.clone(),
        Duration::from_secs(60),
    ));
    tokio::spawn(sweep::run_typing_sweep(db.clone(), Duration::from_secs(600)));

    // Routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/webhooks/identity", post(webhook::identity))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users/sync", post(users::sync))
        .route("/users/me", get(users::me))
        .route("/users/me", put(users::update_profile))
        .route("/users", get(users::list))
        .route("/presence/heartbeat", post(presence::heartbeat))
        .route("/presence/online", post(presence::set_online))
        .route("/presence/offline", post(presence::set_offline))
        .route("/conversations", get(conversations::list))
        .route("/conversations/direct", post(conversations::start_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route("/conversations/{conversation_id}", get(conversations::get))
        .route("/conversations/{conversation_id}", delete(conversations::delete_group))
        .route("/conversations/{conversation_id}/read", post(conversations::mark_as_read))
        .route("/conversations/{conversation_id}/rename", post(conversations::rename_group))
        .route("/conversations/{conversation_id}/leave", post(conversations::leave_group))
        .route("/conversations/{conversation_id}/messages", get(messages::list))
        .route("/conversations/{conversation_id}/messages", post(messages::send))
        .route("/conversations/{conversation_id}/typing", put(typing::set))
        .route("/conversations/{conversation_id}/typing", get(typing::list))
        .route("/messages/{message_id}", delete(messages::soft_delete))
        .route("/messages/{message_id}/reactions", post(reactions::toggle))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
