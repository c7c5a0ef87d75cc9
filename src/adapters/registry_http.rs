//! JSON API of the registry process.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use eyre::{Result, WrapErr};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::request_id_middleware,
    config::RegistryConfig,
    core::{
        clock::Clock,
        instance::{InstanceKey, RegistrationRequest},
        registry::LeaseRegistry,
    },
    utils::graceful_shutdown::ShutdownToken,
};

/// Registry process: the lease registry plus its HTTP API.
pub struct RegistryServer {
    state: RegistryState,
}

impl RegistryServer {
    pub fn new(config: &RegistryConfig) -> Self {
        let registry = LeaseRegistry::new(Duration::from_millis(config.lease_ttl_ms));
        Self::with_registry(Arc::new(registry), config)
    }

    pub fn with_clock(config: &RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = LeaseRegistry::with_clock(Duration::from_millis(config.lease_ttl_ms), clock);
        Self::with_registry(Arc::new(registry), config)
    }

    fn with_registry(registry: Arc<LeaseRegistry>, config: &RegistryConfig) -> Self {
        Self {
            state: RegistryState::new(registry, config.environment.as_str()),
        }
    }

    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        &self.state.registry
    }

    pub fn router(&self) -> Router {
        registry_router(self.state.clone())
    }

    /// Serve until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownToken) -> Result<()> {
        let addr = listener
            .local_addr()
            .wrap_err("Failed to read registry listen address")?;
        tracing::info!(
            "Registry listening on {} (lease TTL {:?})",
            addr,
            self.state.registry.lease_ttl()
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.signal())
        .await
        .wrap_err("Registry server error")
    }
}

#[derive(Clone)]
pub struct RegistryState {
    registry: Arc<LeaseRegistry>,
    environment: Arc<str>,
}

impl RegistryState {
    pub fn new(registry: Arc<LeaseRegistry>, environment: impl Into<Arc<str>>) -> Self {
        Self {
            registry,
            environment: environment.into(),
        }
    }
}

pub fn registry_router(state: RegistryState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/deregister", post(deregister))
        .route("/services", get(list_services))
        .route("/services/{app_name}", get(get_service))
        .route("/health", get(health))
        .route("/environment", get(environment))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_id_middleware)),
        )
}

async fn register(
    State(state): State<RegistryState>,
    Json(request): Json<RegistrationRequest>,
) -> impl IntoResponse {
    state.registry.register(request).await;
    Json(json!({ "message": "Registered" }))
}

/// Unknown instances and unparseable bodies are both "not found".
async fn heartbeat(
    State(state): State<RegistryState>,
    body: Result<Json<InstanceKey>, JsonRejection>,
) -> Response {
    let key = match body {
        Ok(Json(key)) => key,
        Err(rejection) => {
            tracing::debug!("Malformed heartbeat: {}", rejection.body_text());
            return instance_not_found();
        }
    };

    if state.registry.heartbeat(&key.app_name, key.port).await {
        Json(json!({ "status": "OK" })).into_response()
    } else {
        instance_not_found()
    }
}

fn instance_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Instance not found" })),
    )
        .into_response()
}

async fn deregister(
    State(state): State<RegistryState>,
    Json(key): Json<InstanceKey>,
) -> impl IntoResponse {
    state.registry.deregister(&key.app_name, key.port).await;
    Json(json!({ "status": "Deregistered" }))
}

async fn list_services(State(state): State<RegistryState>) -> impl IntoResponse {
    Json(state.registry.services().await)
}

async fn get_service(
    State(state): State<RegistryState>,
    Path(app_name): Path<String>,
) -> impl IntoResponse {
    Json(state.registry.service(&app_name).await)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

async fn environment(State(state): State<RegistryState>) -> impl IntoResponse {
    Json(json!({ "env": &*state.environment, "dataCenterCount": 1 }))
}
