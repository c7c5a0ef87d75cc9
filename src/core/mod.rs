pub mod clock;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod instance;
pub mod invoker;
pub mod load_balancer;
pub mod rate_limiter;
pub mod registry;
pub mod route;
pub mod service_client;

pub use clock::{Clock, ManualClock, SystemClock};
pub use discovery::DiscoveryCache;
pub use error::{CoreError, CoreResult};
pub use gateway::GatewayService;
pub use instance::{InstanceKey, InstanceStatus, RegistrationRequest, ServiceInstance};
pub use invoker::{InvocationEngine, InvocationRequest, InvocationResponse};
pub use load_balancer::LoadBalancer;
pub use rate_limiter::{Admission, RateLimiter};
pub use registry::LeaseRegistry;
pub use route::{Route, RouteTable};
pub use service_client::{MethodDescriptor, ServiceClient};
