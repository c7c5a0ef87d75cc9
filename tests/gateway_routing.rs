// Gateway routing against real downstream servers discovered through an
// in-process lease registry
#[cfg(test)]
mod test {
    use std::{
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use axum::{
        Json, Router,
        body::{Body, Bytes},
        extract::Request,
        http::{StatusCode, header},
    };
    use herald::{
        adapters::{GatewayServer, HttpClientAdapter, InMemoryCounterStore},
        config::{GatewayConfig, RetryPolicy, RouteDefinition},
        core::{InstanceStatus, LeaseRegistry, RegistrationRequest},
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Downstream that echoes what it received.
    async fn echo_backend(name: &'static str) -> SocketAddr {
        spawn(Router::new().fallback(move |req: Request| async move {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let body = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
            Json(json!({
                "backend": name,
                "method": method,
                "uri": uri,
                "body": String::from_utf8_lossy(&body),
            }))
        }))
        .await
    }

    async fn failing_backend(hits: Arc<AtomicUsize>) -> SocketAddr {
        spawn(Router::new().fallback(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }))
        .await
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn register(registry: &LeaseRegistry, app: &str, port: u16) {
        registry
            .register(
                RegistrationRequest::new(app, port)
                    .with_ip("127.0.0.1")
                    .with_status(InstanceStatus::Up),
            )
            .await;
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            retry_delay_ms: 10,
            failover: false,
            timeout_ms: 2_000,
        }
    }

    fn base_config() -> GatewayConfig {
        GatewayConfig::builder()
            .route(
                RouteDefinition::new("orders", "lb://order-service")
                    .predicate("Path=/orders/**")
                    .filter("StripPrefix=1"),
            )
            .route(
                RouteDefinition::new("users", "lb://user-service")
                    .predicate("Path=/users/**")
                    .predicate("Method=GET"),
            )
            .retry(fast_retry())
            .build()
    }

    fn gateway(config: GatewayConfig, registry: Arc<LeaseRegistry>) -> Router {
        GatewayServer::new(
            config,
            registry,
            Arc::new(HttpClientAdapter::new()),
            Arc::new(InMemoryCounterStore::new()),
        )
        .unwrap()
        .router()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes: Bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_strip_prefix_and_query_reach_backend() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("orders-1").await;
        register(&registry, "order-service", backend.port()).await;
        let app = gateway(base_config(), registry);

        let (status, body) = call(&app, get_req("/orders/123?full=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uri"], "/123?full=1");
        assert_eq!(body["method"], "GET");

        let (status, body) = call(&app, get_req("/orders")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uri"], "/");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trailing_slash_on_route_base_is_forwarded() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("orders-1").await;
        register(&registry, "order-service", backend.port()).await;
        let app = gateway(base_config(), registry);

        let (status, body) = call(&app, get_req("/orders/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uri"], "/");

        let (status, body) = call(&app, get_req("/orders/?page=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uri"], "/?page=2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_post_body_is_forwarded() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("orders-1").await;
        register(&registry, "order-service", backend.port()).await;
        let app = gateway(base_config(), registry);

        let req = Request::builder()
            .method("POST")
            .uri("/orders")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"item":"book"}"#))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "POST");
        assert_eq!(body["body"], r#"{"item":"book"}"#);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_round_robin_across_instances() {
        let registry = Arc::new(LeaseRegistry::default());
        let first = echo_backend("orders-1").await;
        let second = echo_backend("orders-2").await;
        register(&registry, "order-service", first.port()).await;
        register(&registry, "order-service", second.port()).await;
        let app = gateway(base_config(), registry);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (_, body) = call(&app, get_req("/orders/1")).await;
            seen.push(body["backend"].as_str().unwrap().to_string());
        }
        assert_eq!(seen, ["orders-1", "orders-2", "orders-1", "orders-2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_instances_is_service_unavailable() {
        let app = gateway(base_config(), Arc::new(LeaseRegistry::default()));
        let (status, body) = call(&app, get_req("/orders/1")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "No instance found for order-service");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_backend_is_dispatch_failure() {
        let registry = Arc::new(LeaseRegistry::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let backend = failing_backend(hits.clone()).await;
        register(&registry, "order-service", backend.port()).await;
        let app = gateway(base_config(), registry);

        let (status, body) = call(&app, get_req("/orders/1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to route to orders");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failover_skips_dead_instance() {
        let registry = Arc::new(LeaseRegistry::default());
        register(&registry, "order-service", closed_port().await).await;
        let backend = echo_backend("orders-live").await;
        register(&registry, "order-service", backend.port()).await;

        let mut config = base_config();
        config.retry.failover = true;
        let app = gateway(config, registry);

        let (status, body) = call(&app, get_req("/orders/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"], "orders-live");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_method_predicate_and_unknown_path() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("users-1").await;
        register(&registry, "user-service", backend.port()).await;
        let app = gateway(base_config(), registry);

        let (status, body) = call(&app, get_req("/users/7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uri"], "/users/7");

        let req = Request::builder()
            .method("DELETE")
            .uri("/users/7")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = call(&app, get_req("/inventory/1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rate_limits_per_caller() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("orders-1").await;
        register(&registry, "order-service", backend.port()).await;

        let mut config = base_config();
        config.global_rate_limit = Some(herald::config::GlobalRateLimit {
            window_ms: 60_000,
            max: 3,
        });
        config.rate_limits.push(herald::config::RateLimitPolicy {
            service: "orders".to_string(),
            window_ms: 60_000,
            max: 1,
        });
        let app = gateway(config, registry);

        let from = |caller: &str, uri: &str| {
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", caller)
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = call(&app, from("10.0.0.1", "/orders/1")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, from("10.0.0.1", "/orders/1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Rate limit exceeded for service: orders");

        // Another caller has its own windows.
        let (status, _) = call(&app, from("10.0.0.2", "/orders/1")).await;
        assert_eq!(status, StatusCode::OK);

        // Third global request for 10.0.0.1 is still under the global max.
        let (status, _) = call(&app, from("10.0.0.1", "/users/1")).await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, body) = call(&app, from("10.0.0.1", "/users/1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Global rate limit exceeded.");

        // Exempt paths are never counted.
        for _ in 0..5 {
            let (status, body) = call(&app, from("10.0.0.1", "/health")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "status": "UP" }));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bearer_auth_guards_routes() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("orders-1").await;
        register(&registry, "order-service", backend.port()).await;

        let mut config = base_config();
        config.auth = Some(herald::config::AuthConfig {
            secret: "gateway-secret".to_string(),
        });
        let app = gateway(config, registry);

        let (status, _) = call(&app, get_req("/orders/1")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = encode(
            &Header::default(),
            &json!({ "sub": "alice" }),
            &EncodingKey::from_secret(b"gateway-secret"),
        )
        .unwrap();
        let req = Request::builder()
            .uri("/orders/1")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uri"], "/1");

        let req = Request::builder()
            .uri("/orders/1")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_route_config_is_rejected() {
        let config = GatewayConfig::builder()
            .route(RouteDefinition::new("bad", "lb://order-service").predicate("Host=x"))
            .build();
        let result = GatewayServer::new(
            config,
            Arc::new(LeaseRegistry::default()),
            Arc::new(HttpClientAdapter::new()),
            Arc::new(InMemoryCounterStore::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serves_over_tcp_with_peer_identity() {
        let registry = Arc::new(LeaseRegistry::default());
        let backend = echo_backend("orders-1").await;
        register(&registry, "order-service", backend.port()).await;

        let server = GatewayServer::new(
            base_config(),
            registry,
            Arc::new(HttpClientAdapter::new()),
            Arc::new(InMemoryCounterStore::new()),
        )
        .unwrap();
        let shutdown = herald::utils::GracefulShutdown::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(server.serve(listener, shutdown.shutdown_token()));

        let body: Value = reqwest::get(format!("http://{addr}/orders/42"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["uri"], "/42");

        shutdown.trigger_shutdown(herald::utils::ShutdownReason::Graceful);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = gateway(base_config(), Arc::new(LeaseRegistry::default()));
        let (status, body) = call(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "UP" }));
    }
}
