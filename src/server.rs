//! HTTP server publishing color events as server-sent events.
//!
//! - `GET /screen-color?interval=<ms>`: a feed at the requested interval
//! - `GET /screen-colors`: the shared feed at the configured interval

use crate::color_stream::ColorStream;
use crate::config::ServerConfig;
use crate::types::{ColorEvent, SubscribeError};
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    colors: ColorStream,
    default_interval_ms: u64,
    shared_interval_ms: u64,
}

impl AppState {
    pub fn new(colors: ColorStream, config: &ServerConfig) -> Self {
        Self {
            colors,
            default_interval_ms: config.default_interval_ms,
            shared_interval_ms: config.shared_interval_ms,
        }
    }
}

/// Build the router with permissive CORS for GET requests
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/screen-color", get(screen_color))
        .route("/screen-colors", get(screen_colors))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IntervalQuery {
    interval: Option<String>,
}

async fn screen_color(
    State(state): State<AppState>,
    Query(query): Query<IntervalQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = match query.interval.as_deref() {
        Some(interval) => state.colors.subscribe_str(interval)?,
        None => state.colors.subscribe(state.default_interval_ms)?,
    };
    info!("Client subscribed to /screen-color");
    Ok(Sse::new(events.map(to_sse)).keep_alive(KeepAlive::default()))
}

async fn screen_colors(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.colors.subscribe(state.shared_interval_ms)?;
    info!("Client subscribed to /screen-colors");
    Ok(Sse::new(events.map(to_sse)).keep_alive(KeepAlive::default()))
}

fn to_sse(event: ColorEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&event).unwrap_or_else(|e| {
        warn!("Failed to serialize color event: {}", e);
        "{}".into()
    });
    Ok(Event::default().data(data))
}

/// Rejected subscription
pub struct ApiError(SubscribeError);

impl From<SubscribeError> for ApiError {
    fn from(e: SubscribeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("Rejected subscription: {}", self.0);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

/// Serve until `shutdown` resolves
pub async fn serve(
    state: AppState,
    bind_address: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
