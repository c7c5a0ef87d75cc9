//! Inbound HTTP side of the gateway: one axum route per configured route,
//! wrapped in admission control and optional bearer authentication.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::Request,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter, get, on},
};
use eyre::{Result, WrapErr};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        counter_store::{InMemoryCounterStore, RedisCounterStore},
        http_client::HttpClientAdapter,
        middleware::{BearerAuth, auth_middleware, rate_limit_middleware, request_id_middleware},
        registry_client::RegistryClient,
    },
    config::GatewayConfig,
    core::{
        gateway::GatewayService,
        invoker::InvocationEngine,
        load_balancer::LoadBalancer,
        rate_limiter::RateLimiter,
        route::{Route, RouteTable},
    },
    ports::{counter_store::CounterStore, discovery::DiscoverySource, http_client::HttpClient},
    utils::graceful_shutdown::ShutdownToken,
};

const HEALTH_PATH: &str = "/health";

/// Fully wired gateway; call [`GatewayServer::serve`] to start accepting traffic.
pub struct GatewayServer {
    config: GatewayConfig,
    gateway: Arc<GatewayService>,
    limiter: Arc<RateLimiter>,
    auth: Option<Arc<BearerAuth>>,
}

impl GatewayServer {
    /// Wire the gateway against explicit collaborators.
    pub fn new(
        config: GatewayConfig,
        discovery: Arc<dyn DiscoverySource>,
        http_client: Arc<dyn HttpClient>,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        let routes = RouteTable::build(&config.routes).wrap_err("Invalid route configuration")?;

        let engine = InvocationEngine::new(discovery, Arc::new(LoadBalancer::new()), http_client)
            .with_strategy(config.load_balance_strategy);
        let gateway = Arc::new(GatewayService::new(routes, Arc::new(engine), config.retry));

        let limiter = RateLimiter::new(config.app_name.clone(), store)
            .with_global(config.global_rate_limit)
            .with_service_limits(config.rate_limits.clone())
            .with_exemptions(&config.rate_limit_exemptions)
            .wrap_err("Invalid rate limit exemption pattern")?;

        let auth = config
            .auth
            .as_ref()
            .map(|auth| BearerAuth::new(&auth.secret, &config.rate_limit_exemptions))
            .transpose()
            .wrap_err("Invalid auth exemption pattern")?
            .map(Arc::new);

        Ok(Self {
            config,
            gateway,
            limiter: Arc::new(limiter),
            auth,
        })
    }

    /// Wire the gateway for production: remote registry, hyper client, and
    /// Redis counters when a URL is configured.
    pub async fn from_config(config: GatewayConfig) -> Result<Self> {
        let discovery = Arc::new(
            RegistryClient::new(
                config.registry_url.clone(),
                Duration::from_millis(config.registry_timeout_ms),
            )
            .wrap_err("Failed to create registry client")?,
        );

        let store: Arc<dyn CounterStore> = match &config.rate_limit_store.redis_url {
            Some(url) => Arc::new(
                RedisCounterStore::connect(url)
                    .await
                    .wrap_err_with(|| format!("Failed to connect rate limit store at {url}"))?,
            ),
            None => {
                tracing::warn!(
                    "No rate limit store configured; counters are local to this gateway process"
                );
                Arc::new(InMemoryCounterStore::new())
            }
        };

        Self::new(config, discovery, Arc::new(HttpClientAdapter::new()), store)
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new().route(HEALTH_PATH, get(health));

        for route in self.gateway.routes().routes() {
            let Some(method_router) = self.method_router(route) else {
                continue;
            };
            for path in route.axum_paths() {
                if path == HEALTH_PATH {
                    tracing::warn!(route = %route.id, "Route shadows the gateway health endpoint, skipping");
                    continue;
                }
                router = router.route(&path, method_router.clone());
            }
            tracing::info!(
                "Configured route {}: {} {:?} -> lb://{}",
                route.id,
                route.path_pattern,
                route.methods,
                route.target_service_name
            );
        }

        router = router
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(
                self.limiter.clone(),
                rate_limit_middleware,
            ));
        if let Some(auth) = &self.auth {
            router = router.layer(middleware::from_fn_with_state(auth.clone(), auth_middleware));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_id_middleware)),
        )
    }

    fn method_router(&self, route: &Route) -> Option<MethodRouter> {
        let mut filter: Option<MethodFilter> = None;
        for method in &route.methods {
            match MethodFilter::try_from(method.clone()) {
                Ok(f) => filter = Some(filter.map_or(f, |acc| acc.or(f))),
                Err(_) => tracing::warn!(route = %route.id, %method, "Unsupported method on route"),
            }
        }
        let filter = filter?;

        let gateway = self.gateway.clone();
        let route = Arc::new(route.clone());
        let max_body_bytes = self.config.max_body_bytes;
        let handler = move |req: Request| {
            let gateway = gateway.clone();
            let route = route.clone();
            async move { forward(gateway, route, req, max_body_bytes).await }
        };
        Some(on(filter, handler))
    }

    /// Serve until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownToken) -> Result<()> {
        let addr = listener
            .local_addr()
            .wrap_err("Failed to read gateway listen address")?;
        tracing::info!(
            "Gateway {} listening on {} with {} routes",
            self.config.app_name,
            addr,
            self.gateway.routes().len()
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.signal())
        .await
        .wrap_err("Gateway server error")
    }
}

async fn forward(
    gateway: Arc<GatewayService>,
    route: Arc<Route>,
    req: Request,
    max_body_bytes: usize,
) -> Response {
    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(route = %route.id, "Rejected request body: {}", e);
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "Request body too large" })),
            )
                .into_response();
        }
    };

    match gateway
        .forward(&route, parts.method, &parts.uri, parts.headers, body)
        .await
    {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!(route = %route.id, error = %e, "Failed to route request");
            e.into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

async fn not_found(req: Request) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("No route for {}", req.uri().path()) })),
    )
}
