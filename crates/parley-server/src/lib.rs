//! Router assembly for the parley server binary.

pub mod config;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{HeaderValue, Method, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_api::state::AppState;
use parley_api::{messages, middleware::require_auth, users};
use parley_gateway::connection;

/// Base64 images up to 10 MB plus JSON overhead
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

pub fn build_router(state: AppState, frontend_url: Option<&str>) -> Result<Router> {
    let message_routes = Router::new()
        // Fixed paths win over `{id}` regardless of order
        .route("/users", get(users::get_users_for_sidebar))
        .route("/unreadCounts", get(messages::get_unread_counts))
        .route("/markRead/{id}", post(messages::mark_read))
        .route("/send/{id}", post(messages::send_message))
        .route("/{id}", get(messages::get_messages))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

    let ws_route = Router::new().route("/gateway", get(ws_upgrade));

    let cors = match frontend_url {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("invalid frontend origin '{}'", origin))?,
            )
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        None => CorsLayer::permissive(),
    };

    let uploads = ServeDir::new(state.blobs.dir());

    Ok(Router::new()
        .nest("/api/messages", message_routes)
        .merge(ws_route)
        .nest_service("/uploads", uploads)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        ))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    let store = state.store.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, store))
}
