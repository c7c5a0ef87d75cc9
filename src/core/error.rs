//! Domain error kinds surfaced by discovery, invocation, routing and admission.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors raised by the core components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Discovery returned zero live instances.
    #[error("No instance found for {0}")]
    ServiceNotFound(String),

    /// The registry was unreachable or answered with something unusable.
    #[error("Discovery failed for {service}: {reason}")]
    DiscoveryFailed { service: String, reason: String },

    /// Every instance/attempt combination failed.
    #[error("All retries and failovers failed for {service} after {attempts} attempts")]
    AllRetriesExhausted { service: String, attempts: u32 },

    /// Admission check rejected the request.
    #[error("{0}")]
    RateLimited(String),

    /// Uncaught failure while forwarding a gateway request.
    #[error("Failed to route to {route_id}: {message}")]
    RouteDispatchFailed { route_id: String, message: String },

    /// The shared counter store could not be reached.
    #[error("Counter store error: {0}")]
    CounterStore(String),

    /// A route definition could not be parsed.
    #[error("Invalid route '{route_id}': {message}")]
    InvalidRoute { route_id: String, message: String },

    /// A request body could not be serialized before sending.
    #[error("Failed to encode request to {service}: {message}")]
    Encode { service: String, message: String },

    /// A downstream response body could not be decoded.
    #[error("Failed to decode response from {service}: {message}")]
    Decode { service: String, message: String },
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::ServiceNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            CoreError::RouteDispatchFailed { route_id, message } => json!({
                "error": format!("Failed to route to {route_id}"),
                "message": message,
            }),
            CoreError::CounterStore(_) => json!({ "error": "Internal rate limit error" }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
