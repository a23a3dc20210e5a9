//! Status page: a JSON snapshot of the session for browsers and scripts

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;

use crate::session::{SessionStatus, TransferSession};

#[derive(Clone)]
pub struct StatusState {
    session: Arc<TransferSession>,
    connections: watch::Receiver<usize>,
}

impl StatusState {
    pub fn new(session: Arc<TransferSession>, connections: watch::Receiver<usize>) -> Self {
        Self {
            session,
            connections,
        }
    }
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/status", get(status_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn(add_security_headers))
        .with_state(state)
}

async fn status_handler(State(state): State<StatusState>) -> Json<SessionStatus> {
    let active = *state.connections.borrow();
    Json(state.session.status(active))
}

pub(crate) async fn not_found_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

/// Middleware to add security headers
pub(crate) async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
