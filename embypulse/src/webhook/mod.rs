//! Webhook ingress: one route that authenticates and decodes Emby webhooks.

mod payload;

pub use payload::{WebhookEvent, decode};

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::service::PulseService;

pub const WEBHOOK_PATH: &str = "/api/v1/webhook";

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Error body returned by the ingress.
#[derive(Debug, Serialize)]
pub struct WebhookErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct WebhookError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl WebhookError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN",
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = WebhookErrorResponse {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    pub status: &'static str,
}

pub fn router(service: Arc<PulseService>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn receive(
    State(service): State<Arc<PulseService>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAccepted>, WebhookError> {
    let expected = service.config().snapshot().server.webhook_token.clone();
    if query.token.as_deref().unwrap_or_default() != expected {
        warn!("Webhook rejected: invalid token");
        return Err(WebhookError::forbidden("Invalid webhook token"));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let event = decode(&body, content_type, Utc::now()).map_err(|e| {
        debug!(error = %e, "Undecodable webhook body");
        WebhookError::bad_request(e.to_string())
    })?;

    service.ingest(event);
    Ok(Json(WebhookAccepted { status: "success" }))
}
