//! HTTP Bridge
//!
//! Small JSON API in front of the dispatcher, for services that want to push
//! notifications without speaking the wire protocol.
//!
//! | Route             | Body                              | Success               |
//! |-------------------|-----------------------------------|-----------------------|
//! | `POST /send`      | `{client_id, title, message}`     | `{"status":"sent",..}`|
//! | `POST /broadcast` | `{title, message}`                | `{"status":"sent",..}`|
//! | `GET /stats`      |                                   | registry + dispatch   |
//!
//! Every route sits behind the `X-API-KEY` check. Errors are always
//! `{"error": "..."}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use hub_core::transport::StatsReply;
use hub_core::{
    AuthError, DispatchCounters, DispatchReport, HubError, Notification, NotificationDispatcher,
    SharedSecret, API_KEY_HEADER,
};

/// Service label stamped on notifications pushed through `/send` and `/broadcast`
pub const HTTP_SERVICE_NAME: &str = "http_gateway";

/// State shared by every handler
#[derive(Clone, Debug)]
pub struct HttpState {
    dispatcher: NotificationDispatcher,
    secret: SharedSecret,
}

impl HttpState {
    /// Bundle the dispatcher with the configured secret
    #[must_use]
    pub fn new(dispatcher: NotificationDispatcher, secret: SharedSecret) -> Self {
        Self { dispatcher, secret }
    }
}

/// Build the bridge router
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/broadcast", post(broadcast))
        .route("/stats", get(stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Failure surfaced to an HTTP caller
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller failed authentication
    #[error(transparent)]
    Auth(AuthError),

    /// The request body was unusable
    #[error("{0}")]
    BadRequest(String),

    /// The core refused or failed the operation
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        if e.is_server_error() {
            Self::Hub(HubError::Configuration(e.to_string()))
        } else {
            Self::Auth(e)
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Hub(HubError::Validation { .. }) => StatusCode::BAD_REQUEST,
            Self::Hub(HubError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Hub(HubError::Delivery { .. } | HubError::Configuration(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Middleware
// =============================================================================

async fn require_api_key(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state.secret.verify(provided) {
        if e.is_server_error() {
            warn!("Rejecting HTTP request: no API key configured");
        } else {
            warn!(path = %request.uri().path(), error = %e, "Rejecting HTTP request");
        }
        return Err(e.into());
    }

    Ok(next.run(request).await)
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /send` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Target client
    pub client_id: String,
    /// Notification title
    #[serde(default)]
    pub title: String,
    /// Notification body
    #[serde(default)]
    pub message: String,
}

/// `POST /broadcast` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Notification title
    #[serde(default)]
    pub title: String,
    /// Notification body
    #[serde(default)]
    pub message: String,
}

/// Successful `/send` or `/broadcast` reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentResponse {
    /// Always `"sent"`
    pub status: String,
    /// Id of the dispatched notification
    pub notification_id: String,
    /// Devices considered
    pub total: usize,
    /// Devices that accepted it
    pub delivered: usize,
    /// Active devices whose send failed
    pub failed: usize,
    /// Devices without a stream
    pub inactive: usize,
}

impl SentResponse {
    fn new(notification: &Notification, report: &DispatchReport) -> Self {
        Self {
            status: "sent".to_string(),
            notification_id: notification.id.clone(),
            total: report.total,
            delivered: report.delivered,
            failed: report.failed,
            inactive: report.inactive,
        }
    }
}

/// `GET /stats` reply
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Registry counts and client ids
    #[serde(flatten)]
    pub registry: StatsReply,
    /// Cumulative dispatch counters
    pub dispatch: DispatchCounters,
}

async fn send(
    State(state): State<HttpState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SentResponse>, ApiError> {
    let Json(request) = body?;
    if request.client_id.is_empty() {
        return Err(ApiError::BadRequest("client_id is required".to_string()));
    }

    let notification = Notification::new(
        &request.client_id,
        &request.title,
        &request.message,
        HTTP_SERVICE_NAME,
    );
    let report = state.dispatcher.send_to_client(&notification).await?;

    info!(
        client_id = %request.client_id,
        delivered = report.delivered,
        total = report.total,
        "HTTP send dispatched"
    );
    Ok(Json(SentResponse::new(&notification, &report)))
}

async fn broadcast(
    State(state): State<HttpState>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<SentResponse>, ApiError> {
    let Json(request) = body?;

    let notification = Notification::broadcast(&request.title, &request.message, HTTP_SERVICE_NAME);
    let report = state.dispatcher.broadcast(&notification).await;

    info!(
        delivered = report.delivered,
        total = report.total,
        "HTTP broadcast dispatched"
    );
    Ok(Json(SentResponse::new(&notification, &report)))
}

async fn stats(State(state): State<HttpState>) -> Json<StatsResponse> {
    let registry = state.dispatcher.registry();
    Json(StatsResponse {
        registry: StatsReply::new(registry.stats(), registry.client_ids()),
        dispatch: state.dispatcher.stats(),
    })
}
