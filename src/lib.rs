//! Herald - a lease-based service registry and a discovery-aware API gateway.
//!
//! Herald is made of two processes and one embeddable client:
//!
//! - The **registry** holds instance leases. Instances register, heartbeat to
//!   keep their lease alive, and deregister on shutdown. An instance whose last
//!   heartbeat is older than the lease TTL disappears from discovery results
//!   without any background sweeper.
//! - The **gateway** maps path predicates to logical services, resolves them
//!   through the registry, load balances across live instances, retries with
//!   linear backoff and optional failover, and admits traffic through
//!   fixed-window rate limits shared via Redis.
//! - The **service client** gives any process the same discovery, balancing
//!   and retry behaviour for outbound calls.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use herald::{
//!     adapters::{GatewayServer, InMemoryCounterStore, HttpClientAdapter},
//!     config::{GatewayConfig, RouteDefinition},
//!     core::LeaseRegistry,
//!     utils::GracefulShutdown,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = GatewayConfig::builder()
//!     .route(
//!         RouteDefinition::new("orders", "lb://order-service")
//!             .predicate("Path=/orders/**")
//!             .filter("StripPrefix=1"),
//!     )
//!     .build();
//!
//! // An in-process registry works as a discovery source, handy in tests
//! let registry = Arc::new(LeaseRegistry::default());
//! let gateway = GatewayServer::new(
//!     config,
//!     registry,
//!     Arc::new(HttpClientAdapter::new()),
//!     Arc::new(InMemoryCounterStore::new()),
//! )?;
//!
//! let shutdown = GracefulShutdown::new();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! gateway.serve(listener, shutdown.shutdown_token()).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`. Discovery, outbound HTTP and rate-limit counters are all
//! ports, so the core is tested against in-memory fakes and a manual clock.
//!
//! # Error Handling
//! Domain operations return [`core::CoreError`], which maps onto the HTTP status the
//! gateway answers with. Process wiring returns `eyre::Result<T>` with `WrapErr` context.
//!
//! # Concurrency & Data Structures
//! Per-key state such as round-robin cursors, cached discovery entries and in-memory
//! counters lives in `scc::HashMap`. The registry itself sits behind a `tokio::sync::RwLock`
//! so that register, heartbeat and deregister are atomic per call.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{GatewayServer, HttpClientAdapter, InstanceRegistrar, RegistryClient, RegistryServer},
    core::{GatewayService, InvocationEngine, LeaseRegistry, ServiceClient},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
