use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::error;

use crate::fetcher::{ErrorEnvelope, Fetcher};
use crate::query::{parse_limit, parse_since, LatestQuery, DEFAULT_LIMIT, MAX_LIMIT};

pub const LATEST_PATH: &str = "/api/theverge/latest";
const LATEST_CACHE_CONTROL: &str = "public, s-maxage=60, stale-while-revalidate=30";
const DEFAULT_DISCOVER_API: &str = "/api/theverge/latest?limit=20";

pub struct AppState {
    pub fetcher: Arc<Fetcher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/api", get(api_index))
        .route(LATEST_PATH, get(latest))
        .layer(cors);

    Router::new()
        .merge(api)
        .route("/api/discover", get(discover))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Template)]
#[template(path = "discover.html")]
pub struct DiscoverTemplate {
    pub label: String,
    /// Listing endpoint as a JSON string literal, safe inside `<script>`
    pub api_json: String,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

// Route handlers
pub async fn latest(
    State(state): State<Arc<AppState>>,
    query: Option<Query<Vec<(String, String)>>>,
) -> Response {
    let query = query
        .map(|Query(pairs)| LatestQuery::from_pairs(pairs))
        .unwrap_or_default();
    let limit = parse_limit(query.limit.as_deref());
    let since = parse_since(query.since.as_deref());

    match state.fetcher.fetch(query.url.as_deref(), limit, since).await {
        Ok(feed) => (
            [(header::CACHE_CONTROL, LATEST_CACHE_CONTROL)],
            Json(feed),
        )
            .into_response(),
        Err(err) => {
            let envelope = ErrorEnvelope::new(&state.fetcher.source().label, &err);
            error!("{}: {}", envelope.error, envelope.detail);
            let status = StatusCode::from_u16(envelope.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(envelope)).into_response()
        }
    }
}

pub async fn api_index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let label = &state.fetcher.source().label;
    Json(json!({
        "name": "Tech News API",
        "description": format!("Latest {} articles as normalized JSON.", label),
        "endpoints": {
            "theVergeLatest": LATEST_PATH,
            "discover": "/api/discover",
        },
        "params": {
            "limit": format!("1 to {}, default {}", MAX_LIMIT, DEFAULT_LIMIT),
            "since": "ISO date-time, e.g. 2025-01-01T00:00:00.000Z, or YYYY-MM-DD (midnight UTC+08:00)",
        },
        "examples": [
            format!("{}?limit=10", LATEST_PATH),
            format!("{}?limit=15&since=2025-01-01T00:00:00.000Z", LATEST_PATH),
        ],
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverQuery {
    pub api: Option<String>,
}

pub async fn discover(
    State(state): State<Arc<AppState>>,
    query: Option<Query<DiscoverQuery>>,
) -> Result<impl IntoResponse, AppError> {
    let api = query
        .and_then(|Query(q)| q.api)
        .filter(|api| !api.is_empty())
        .unwrap_or_else(|| DEFAULT_DISCOVER_API.to_string());
    let api_json = serde_json::to_string(&api)?.replace('<', "\\u003c");

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        HtmlTemplate(DiscoverTemplate {
            label: state.fetcher.source().label.clone(),
            api_json,
        }),
    ))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
