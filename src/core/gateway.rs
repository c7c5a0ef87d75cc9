//! Core gateway orchestration service.
//!
//! `GatewayService` owns the parsed [`RouteTable`], the gateway's retry policy
//! and an [`InvocationEngine`]. For a matched route it:
//! * reads live instances straight from the engine's discovery source (no cache)
//! * answers 503 when there are none, without calling the engine
//! * strips the configured number of leading path segments
//! * delegates to the engine and relays the buffered 2xx response
//!
//! Any other failure while dispatching becomes
//! [`CoreError::RouteDispatchFailed`] carrying the route id.
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::{
    config::RetryPolicy,
    core::{
        CoreError, CoreResult,
        invoker::{InvocationEngine, InvocationRequest, InvocationResponse},
        route::{Route, RouteTable},
    },
};

pub struct GatewayService {
    routes: RouteTable,
    engine: Arc<InvocationEngine>,
    policy: RetryPolicy,
}

impl GatewayService {
    pub fn new(routes: RouteTable, engine: Arc<InvocationEngine>, policy: RetryPolicy) -> Self {
        Self {
            routes,
            engine,
            policy,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn route(&self, id: &str) -> Option<&Route> {
        self.routes.routes().iter().find(|r| r.id == id)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Forward one inbound request along `route`.
    pub async fn forward(
        &self,
        route: &Route,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> CoreResult<InvocationResponse> {
        let service = route.target_service_name.as_str();
        let dispatch_failed = |e: CoreError| CoreError::RouteDispatchFailed {
            route_id: route.id.clone(),
            message: e.to_string(),
        };

        let instances = self
            .engine
            .discovery()
            .discover(service)
            .await
            .map_err(dispatch_failed)?;
        if instances.is_empty() {
            tracing::warn!(route = %route.id, service, "No live instances for route");
            return Err(CoreError::ServiceNotFound(service.to_string()));
        }

        let path = route.strip_prefix(uri.path());
        tracing::debug!(
            route = %route.id,
            service,
            %method,
            inbound = %uri.path(),
            downstream = %path,
            "Forwarding request"
        );

        let request = InvocationRequest::new(method, path)
            .with_query(uri.query().map(str::to_string))
            .with_headers(headers)
            .with_body(body);

        self.engine
            .invoke_on(service, &instances, &request, &self.policy)
            .await
            .map_err(dispatch_failed)
    }
}
