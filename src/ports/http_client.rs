use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to an instance fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error when an instance returns an error status code
    #[error("Instance returned error status: {status}, url: {url}")]
    BackendError {
        /// The URL that was requested
        url: String,
        /// The status code returned by the instance
        status: StatusCode,
    },
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for outbound calls to service instances
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a service instance
    ///
    /// # Arguments
    /// * `req` - The fully addressed request (absolute `http://ip:port/...` URI)
    ///
    /// # Returns
    /// A future that resolves to the instance's response or a transport error.
    /// Non-2xx responses are returned as `Ok`; classifying them is the caller's job.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Probe a health endpoint
    ///
    /// # Arguments
    /// * `url` - The health endpoint to GET
    /// * `timeout_ms` - Timeout in milliseconds
    ///
    /// # Returns
    /// `true` only for a 200 response whose JSON body reports `status: "UP"`
    async fn health_check(&self, url: &str, timeout_ms: u64) -> HttpClientResult<bool>;
}
