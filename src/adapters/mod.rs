pub mod counter_store;
pub mod gateway_http;
pub mod http_client;
pub mod middleware;
pub mod registrar;
pub mod registry_client;
pub mod registry_http;

/// Re-export commonly used types from adapters
pub use counter_store::{InMemoryCounterStore, RedisCounterStore};
pub use gateway_http::GatewayServer;
pub use http_client::HttpClientAdapter;
pub use middleware::{AuthClaims, BearerAuth};
pub use registrar::{HeartbeatOutcome, InstanceRegistrar};
pub use registry_client::{RegistryClient, RegistryClientError};
pub use registry_http::{RegistryServer, RegistryState, registry_router};
