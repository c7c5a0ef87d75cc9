//! Axum middleware used by the gateway and registry routers.
//!
//! * `request_id_middleware` tags each request with a UUID span and `X-Request-ID`
//! * `rate_limit_middleware` runs fixed-window admission before routing
//! * `auth_middleware` verifies HS256 bearer tokens when a secret is configured
use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use regex::Regex;
use serde_json::json;
use tracing::Instrument;

use crate::{core::rate_limiter::RateLimiter, tracing_setup::create_request_span};

/// Generate a per-request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);

    let mut response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", header_value);
    }
    response
}

/// Identity used for rate-limit keys: peer address when the server was started
/// with connect info, otherwise the first forwarded address.
pub fn caller_identity(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    forwarded_for(req.headers()).unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    first("x-forwarded-for").or_else(|| first("x-real-ip"))
}

/// Admission control before any route runs.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let caller = caller_identity(&req);
    match limiter.check(req.uri().path(), &caller).await {
        Ok(_) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Verified JWT claims, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct AuthClaims(pub serde_json::Value);

pub struct BearerAuth {
    key: DecodingKey,
    validation: Validation,
    exemptions: Vec<Regex>,
}

impl BearerAuth {
    pub fn new<S: AsRef<str>>(secret: &str, exemptions: &[S]) -> Result<Self, regex::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            exemptions: exemptions
                .iter()
                .map(|p| Regex::new(p.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exemptions.iter().any(|re| re.is_match(path))
    }

    /// Accepts `Bearer <token>` or the bare token.
    pub fn verify(&self, authorization: &str) -> Result<AuthClaims, jsonwebtoken::errors::Error> {
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        decode::<serde_json::Value>(token, &self.key, &self.validation)
            .map(|data| AuthClaims(data.claims))
    }
}

pub async fn auth_middleware(
    State(auth): State<Arc<BearerAuth>>,
    mut req: Request,
    next: Next,
) -> Response {
    if auth.is_exempt(req.uri().path()) {
        return next.run(req).await;
    }

    let Some(authorization) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    };

    match auth.verify(authorization) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Invalid token" })),
            )
                .into_response()
        }
    }
}
