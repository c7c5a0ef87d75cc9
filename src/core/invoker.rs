//! Retry + failover for one logical call to a named service.
use std::{sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header};
use http_body_util::BodyExt;

use crate::{
    config::{LoadBalanceStrategy, RetryPolicy},
    core::{
        CoreError, CoreResult,
        instance::ServiceInstance,
        load_balancer::LoadBalancer,
    },
    ports::{
        discovery::DiscoverySource,
        http_client::{HttpClient, HttpClientError, HttpClientResult},
    },
};

/// Headers that describe a single hop and must not be relayed.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// An outbound call, independent of which instance ends up serving it.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub method: Method,
    /// Downstream path, always starting with `/`.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InvocationRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            path: if path.starts_with('/') {
                path
            } else {
                format!("/{path}")
            },
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query.filter(|q| !q.is_empty());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Only POST, PUT and PATCH carry a body downstream.
    pub fn carries_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    pub fn url_for(&self, instance: &ServiceInstance) -> String {
        match &self.query {
            Some(query) => format!("{}{}?{}", instance.base_url(), self.path, query),
            None => format!("{}{}", instance.base_url(), self.path),
        }
    }

    fn to_http_request(&self, url: &str) -> HttpClientResult<Request<AxumBody>> {
        let mut builder = Request::builder().method(self.method.clone()).uri(url);

        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &self.headers {
                if is_hop_by_hop(name)
                    || name == header::HOST
                    || name == header::CONTENT_LENGTH
                {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
            if !headers.contains_key(header::CONTENT_TYPE) {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
        }

        let body = if self.carries_body() {
            AxumBody::from(self.body.clone())
        } else {
            AxumBody::empty()
        };

        builder
            .body(body)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
    }
}

/// A successful (2xx) downstream response, fully buffered.
#[derive(Debug, Clone)]
pub struct InvocationResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for InvocationResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(AxumBody::from(self.body));
        *response.status_mut() = self.status;
        for (name, value) in &self.headers {
            if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
                continue;
            }
            response.headers_mut().append(name.clone(), value.clone());
        }
        response
    }
}

/// Resolves instances, selects one through the [`LoadBalancer`] and performs the
/// call, retrying the same instance up to `max_retries` times and, when
/// failover is enabled, moving on to the next selected instance.
pub struct InvocationEngine {
    discovery: Arc<dyn DiscoverySource>,
    balancer: Arc<LoadBalancer>,
    http_client: Arc<dyn HttpClient>,
    strategy: LoadBalanceStrategy,
}

impl InvocationEngine {
    pub fn new(
        discovery: Arc<dyn DiscoverySource>,
        balancer: Arc<LoadBalancer>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            discovery,
            balancer,
            http_client,
            strategy: LoadBalanceStrategy::RoundRobin,
        }
    }

    pub fn with_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn discovery(&self) -> &Arc<dyn DiscoverySource> {
        &self.discovery
    }

    pub async fn invoke(
        &self,
        service: &str,
        request: &InvocationRequest,
        policy: &RetryPolicy,
    ) -> CoreResult<InvocationResponse> {
        let instances = self.discovery.discover(service).await?;
        if instances.is_empty() {
            return Err(CoreError::ServiceNotFound(service.to_string()));
        }
        self.invoke_on(service, &instances, request, policy).await
    }

    /// Run the retry/failover loop over an already resolved instance list.
    pub async fn invoke_on(
        &self,
        service: &str,
        instances: &[ServiceInstance],
        request: &InvocationRequest,
        policy: &RetryPolicy,
    ) -> CoreResult<InvocationResponse> {
        if instances.is_empty() {
            return Err(CoreError::ServiceNotFound(service.to_string()));
        }

        let mut attempts = 0u32;
        for _ in 0..instances.len() {
            let Some(instance) = self
                .balancer
                .select_instance(service, instances, self.strategy)
                .await
            else {
                break;
            };

            for attempt in 1..=policy.max_retries {
                attempts += 1;
                match self.attempt(&instance, request, policy.timeout_ms).await {
                    Ok(response) => {
                        tracing::debug!(
                            service,
                            instance = %instance.address(),
                            attempt,
                            status = %response.status,
                            "Invocation succeeded"
                        );
                        return Ok(response);
                    }
                    Err(e) => {
                        tracing::warn!(
                            service,
                            instance = %instance.address(),
                            attempt,
                            error = %e,
                            "Invocation attempt failed"
                        );
                        if attempt < policy.max_retries {
                            let delay = policy.retry_delay_ms.saturating_mul(u64::from(attempt));
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                    }
                }
            }

            if !policy.failover {
                break;
            }
        }

        Err(CoreError::AllRetriesExhausted {
            service: service.to_string(),
            attempts,
        })
    }

    async fn attempt(
        &self,
        instance: &ServiceInstance,
        request: &InvocationRequest,
        timeout_ms: u64,
    ) -> HttpClientResult<InvocationResponse> {
        let url = request.url_for(instance);
        let http_request = request.to_http_request(&url)?;

        let call = async {
            let response = self.http_client.send_request(http_request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(HttpClientError::BackendError {
                    url: url.clone(),
                    status,
                });
            }
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| HttpClientError::ConnectionError(e.to_string()))?
                .to_bytes();
            Ok(InvocationResponse {
                status,
                headers: parts.headers,
                body,
            })
        };

        tokio::time::timeout(Duration::from_millis(timeout_ms), call)
            .await
            .map_err(|_| HttpClientError::Timeout(timeout_ms))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hyper::Response as HyperResponse;

    use super::*;
    use crate::core::instance::InstanceStatus;

    fn instance(port: u16) -> ServiceInstance {
        ServiceInstance {
            instance_id: format!("localhost:order-service:{port}"),
            app_name: "order-service".to_string(),
            ip: "localhost".to_string(),
            port,
            health_check_path: "/health".to_string(),
            status: InstanceStatus::Up,
            last_heartbeat_at: 0,
        }
    }

    /// Fails every call to ports listed in `failing`, answers `{"ok":true}` otherwise.
    struct ScriptedClient {
        failing: Vec<u16>,
        seen: Mutex<Vec<Request<AxumBody>>>,
        delay: Option<Duration>,
    }

    impl ScriptedClient {
        fn new(failing: Vec<u16>) -> Self {
            Self {
                failing,
                seen: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn ports(&self) -> Vec<u16> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.uri().port_u16().unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            let port = req.uri().port_u16().unwrap();
            self.seen.lock().unwrap().push(req);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(&port) {
                return Ok(HyperResponse::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body(AxumBody::empty())
                    .unwrap());
            }
            Ok(HyperResponse::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(AxumBody::from(r#"{"ok":true}"#))
                .unwrap())
        }

        async fn health_check(&self, _url: &str, _timeout_ms: u64) -> HttpClientResult<bool> {
            Ok(true)
        }
    }

    struct FixedSource(Vec<ServiceInstance>);

    #[async_trait]
    impl DiscoverySource for FixedSource {
        async fn discover(&self, _app_name: &str) -> CoreResult<Vec<ServiceInstance>> {
            Ok(self.0.clone())
        }
    }

    fn engine(client: Arc<ScriptedClient>, instances: Vec<ServiceInstance>) -> InvocationEngine {
        InvocationEngine::new(
            Arc::new(FixedSource(instances)),
            Arc::new(LoadBalancer::new()),
            client,
        )
    }

    fn policy(failover: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_delay_ms: 1,
            failover,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_failover_moves_to_next_instance() {
        let client = Arc::new(ScriptedClient::new(vec![4001]));
        let engine = engine(client.clone(), vec![instance(4001), instance(4002)]);

        let response = engine
            .invoke(
                "order-service",
                &InvocationRequest::new(Method::GET, "/orders"),
                &policy(true),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(client.ports(), vec![4001, 4001, 4001, 4002]);
    }

    #[tokio::test]
    async fn test_without_failover_second_instance_is_never_contacted() {
        let client = Arc::new(ScriptedClient::new(vec![4001]));
        let engine = engine(client.clone(), vec![instance(4001), instance(4002)]);

        let err = engine
            .invoke(
                "order-service",
                &InvocationRequest::new(Method::GET, "/orders"),
                &policy(false),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::AllRetriesExhausted { attempts: 3, .. }));
        assert_eq!(client.ports(), vec![4001, 4001, 4001]);
    }

    #[tokio::test]
    async fn test_all_instances_failing_exhausts_every_attempt() {
        let client = Arc::new(ScriptedClient::new(vec![4001, 4002]));
        let engine = engine(client.clone(), vec![instance(4001), instance(4002)]);

        let err = engine
            .invoke(
                "order-service",
                &InvocationRequest::new(Method::GET, "/orders"),
                &policy(true),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::AllRetriesExhausted { attempts: 6, .. }));
    }

    #[tokio::test]
    async fn test_empty_discovery_is_service_not_found() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let engine = engine(client.clone(), vec![]);

        let err = engine
            .invoke(
                "order-service",
                &InvocationRequest::new(Method::GET, "/orders"),
                &policy(true),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::ServiceNotFound(ref s) if s == "order-service"));
        assert!(client.ports().is_empty());
    }

    #[tokio::test]
    async fn test_slow_attempt_counts_as_failure() {
        let client = Arc::new(ScriptedClient {
            delay: Some(Duration::from_millis(200)),
            ..ScriptedClient::new(vec![])
        });
        let engine = engine(client.clone(), vec![instance(4001)]);
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay_ms: 1,
            failover: false,
            timeout_ms: 20,
        };

        let err = engine
            .invoke(
                "order-service",
                &InvocationRequest::new(Method::GET, "/orders"),
                &policy,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AllRetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_body_only_sent_for_mutating_methods() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let engine = engine(client.clone(), vec![instance(4001)]);

        for method in [Method::GET, Method::DELETE, Method::POST] {
            engine
                .invoke(
                    "order-service",
                    &InvocationRequest::new(method, "/orders").with_body(r#"{"qty":1}"#),
                    &policy(false),
                )
                .await
                .unwrap();
        }

        let seen: Vec<_> = std::mem::take(&mut *client.seen.lock().unwrap());
        let mut sizes = Vec::new();
        for req in seen {
            let bytes = req.into_body().collect().await.unwrap().to_bytes();
            sizes.push(bytes.len());
        }
        assert_eq!(sizes, vec![0, 0, 9]);
    }

    #[tokio::test]
    async fn test_request_preserves_query_and_drops_hop_headers() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let engine = engine(client.clone(), vec![instance(4001)]);

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway:8080"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        engine
            .invoke(
                "order-service",
                &InvocationRequest::new(Method::GET, "/123")
                    .with_query(Some("expand=items".to_string()))
                    .with_headers(headers),
                &policy(false),
            )
            .await
            .unwrap();

        let seen = client.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.uri().to_string(), "http://localhost:4001/123?expand=items");
        assert!(req.headers().get(header::HOST).is_none());
        assert!(req.headers().get(header::CONNECTION).is_none());
        assert_eq!(req.headers()["x-request-id"], "abc");
        assert_eq!(req.headers()[header::CONTENT_TYPE], "application/json");
    }
}
