use async_trait::async_trait;

use crate::core::{CoreResult, ServiceInstance};

/// A place live instances of an application can be looked up from.
///
/// Implemented by the in-process lease registry, the remote registry client
/// and the TTL discovery cache that wraps either of them.
#[async_trait]
pub trait DiscoverySource: Send + Sync + 'static {
    /// Return the live instances of `app_name`, in registry order.
    ///
    /// An empty vector means "nothing live"; an `Err` means the lookup itself
    /// failed and the result must not be trusted.
    async fn discover(&self, app_name: &str) -> CoreResult<Vec<ServiceInstance>>;
}
