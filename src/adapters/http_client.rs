use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode, Version, header, header::HeaderValue};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Health endpoint body: only `status` is looked at.
#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

/// Outbound HTTP/1.1 client for calls to service instances.
///
/// Responsibilities:
/// * Sets `Host` from the target URI and a default `User-Agent`
/// * Records each call in a `backend_request` span
/// * Performs JSON health probes with timeout
/// * Converts between Hyper body and Axum body types
///
/// Retries and failover live in the invocation engine, not here.
#[derive(Clone)]
pub struct HttpClientAdapter {
    client: Client<HttpConnector, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(Duration::from_secs(5)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build::<_, AxumBody>(connector);

        tracing::debug!("Created outbound HTTP client");
        Self { client }
    }

    fn add_common_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static(concat!("herald/", env!("CARGO_PKG_VERSION"))),
            );
        }
        if !headers.contains_key(header::ACCEPT) {
            headers.insert(header::ACCEPT, HeaderValue::from_static("application/json, */*"));
        }
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::add_common_headers(&mut req);

        let instance = req
            .uri()
            .authority()
            .map_or_else(|| "unknown".to_string(), |a| a.to_string());
        let span = crate::tracing_setup::create_backend_span(
            &instance,
            req.method().as_str(),
            req.uri().path(),
        );

        match req.uri().authority() {
            Some(authority) => {
                let host = HeaderValue::from_str(authority.as_str())
                    .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
                req.headers_mut().insert(header::HOST, host);
            }
            None => {
                tracing::error!("Outgoing URI has no host: {}", req.uri());
                return Err(HttpClientError::InvalidRequest(
                    "Outgoing URI has no host".to_string(),
                ));
            }
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        let call = async {
            tracing::debug!("Sending request: {} {}", method, uri);
            match self.client.request(Request::from_parts(parts, body)).await {
                Ok(response) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    // Body is re-framed by whoever relays it.
                    parts.headers.remove(header::TRANSFER_ENCODING);
                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Err(e) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::debug!("Request {} {} failed: {}", method, uri, e);
                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method} {uri} failed: {e}"
                    )))
                }
            }
        };

        call.instrument(span).await
    }

    async fn health_check(&self, url: &str, timeout_ms: u64) -> HttpClientResult<bool> {
        let mut request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        Self::add_common_headers(&mut request);
        if let Some(authority) = request.uri().authority().cloned()
            && let Ok(host) = HeaderValue::from_str(authority.as_str())
        {
            request.headers_mut().insert(header::HOST, host);
        }

        tracing::debug!("Health checking URL: {}", url);
        let probe = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| HttpClientError::ConnectionError(e.to_string()))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| HttpClientError::ConnectionError(e.to_string()))?
                .to_bytes();
            Ok::<_, HttpClientError>((status, body))
        };

        match timeout(Duration::from_millis(timeout_ms), probe).await {
            Ok(Ok((status, body))) => {
                let healthy = status == StatusCode::OK
                    && serde_json::from_slice::<HealthBody>(&body)
                        .map(|b| b.status.eq_ignore_ascii_case("UP"))
                        .unwrap_or(false);
                tracing::debug!("Health check for {} result: {}", url, healthy);
                Ok(healthy)
            }
            Ok(Err(e)) => {
                tracing::debug!("Health check error for {}: {}", url, e);
                Ok(false)
            }
            Err(_) => {
                tracing::debug!("Health check timeout for {}", url);
                Err(HttpClientError::Timeout(timeout_ms))
            }
        }
    }
}
