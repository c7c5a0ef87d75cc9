//! Authoritative in-memory lease registry.
//!
//! Instances stay in the registry until they are explicitly deregistered. An
//! instance is only *reported* while its lease is live, i.e. while
//! `now - last_heartbeat_at < lease_ttl`; liveness is re-evaluated on every
//! read instead of by a background sweep.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    core::{
        CoreResult,
        clock::{Clock, SystemClock},
        instance::{RegistrationRequest, ServiceInstance},
    },
    ports::discovery::DiscoverySource,
};

/// Default lease duration before an instance without heartbeats stops being reported.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Service name → instances, in insertion order.
pub struct LeaseRegistry {
    services: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    lease_ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TTL)
    }
}

impl LeaseRegistry {
    pub fn new(lease_ttl: Duration) -> Self {
        Self::with_clock(lease_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(lease_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            lease_ttl_ms: lease_ttl.as_millis().try_into().unwrap_or(u64::MAX),
            clock,
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    fn is_live(&self, instance: &ServiceInstance, now: u64) -> bool {
        now.saturating_sub(instance.last_heartbeat_at) < self.lease_ttl_ms
    }

    fn generate_instance_id(request: &RegistrationRequest) -> String {
        format!(
            "{}:{}:{}-{}",
            request.ip,
            request.app_name,
            request.port,
            Uuid::new_v4().simple()
        )
    }

    /// Register an instance or renew an existing registration.
    ///
    /// A registration matching `(app_name, port)` only has its heartbeat
    /// timestamp and status refreshed; its `instance_id` is kept. Returns a
    /// snapshot of the stored entry.
    pub async fn register(&self, request: RegistrationRequest) -> ServiceInstance {
        let now = self.clock.now_millis();
        let mut services = self.services.write().await;
        let instances = services.entry(request.app_name.clone()).or_default();

        if let Some(existing) = instances.iter_mut().find(|i| i.port == request.port) {
            existing.last_heartbeat_at = now;
            existing.status = request.status;
            tracing::debug!(
                app = %existing.app_name,
                instance = %existing.instance_id,
                "Renewed registration"
            );
            return existing.clone();
        }

        let instance = ServiceInstance {
            instance_id: Self::generate_instance_id(&request),
            app_name: request.app_name,
            ip: request.ip,
            port: request.port,
            health_check_path: request.health_check_path,
            status: request.status,
            last_heartbeat_at: now,
        };
        tracing::info!(
            app = %instance.app_name,
            instance = %instance.instance_id,
            "Registered new instance at {}",
            instance.address()
        );
        instances.push(instance.clone());
        instance
    }

    /// Refresh the lease of `(app_name, port)`. Returns `false` when no such
    /// registration exists; nothing is created in that case.
    pub async fn heartbeat(&self, app_name: &str, port: u16) -> bool {
        let now = self.clock.now_millis();
        let mut services = self.services.write().await;
        match services
            .get_mut(app_name)
            .and_then(|instances| instances.iter_mut().find(|i| i.port == port))
        {
            Some(instance) => {
                instance.last_heartbeat_at = now;
                true
            }
            None => {
                tracing::debug!(app = app_name, port, "Heartbeat for unknown instance");
                false
            }
        }
    }

    /// Remove `(app_name, port)`. Returns whether an entry was removed.
    pub async fn deregister(&self, app_name: &str, port: u16) -> bool {
        let mut services = self.services.write().await;
        let Some(instances) = services.get_mut(app_name) else {
            return false;
        };

        let before = instances.len();
        instances.retain(|i| i.port != port);
        let removed = instances.len() != before;
        if instances.is_empty() {
            services.remove(app_name);
        }
        if removed {
            tracing::info!(app = app_name, port, "Deregistered instance");
        }
        removed
    }

    /// Every application with at least one live instance, mapped to its live instances.
    pub async fn services(&self) -> BTreeMap<String, Vec<ServiceInstance>> {
        let now = self.clock.now_millis();
        let services = self.services.read().await;
        services
            .iter()
            .filter_map(|(app_name, instances)| {
                let live: Vec<_> = instances
                    .iter()
                    .filter(|i| self.is_live(i, now))
                    .cloned()
                    .collect();
                (!live.is_empty()).then(|| (app_name.clone(), live))
            })
            .collect()
    }

    /// Live instances of one application (empty when none are live).
    pub async fn service(&self, app_name: &str) -> Vec<ServiceInstance> {
        let now = self.clock.now_millis();
        let services = self.services.read().await;
        services
            .get(app_name)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| self.is_live(i, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored entries including expired ones.
    pub async fn stored_instance_count(&self) -> usize {
        self.services.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DiscoverySource for LeaseRegistry {
    async fn discover(&self, app_name: &str) -> CoreResult<Vec<ServiceInstance>> {
        Ok(self.service(app_name).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{clock::ManualClock, instance::InstanceStatus};

    fn registry_with_clock() -> (LeaseRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry = LeaseRegistry::with_clock(DEFAULT_LEASE_TTL, clock.clone());
        (registry, clock)
    }

    #[tokio::test]
    async fn test_repeated_registration_keeps_single_entry_and_id() {
        let (registry, clock) = registry_with_clock();
        let first = registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;

        for _ in 0..5 {
            clock.advance(1_000);
            let again = registry
                .register(RegistrationRequest::new("order-service", 4001))
                .await;
            assert_eq!(again.instance_id, first.instance_id);
        }

        let live = registry.service("order-service").await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].instance_id, first.instance_id);
        assert_eq!(live[0].last_heartbeat_at, 1_005_000);
    }

    #[tokio::test]
    async fn test_reregistration_updates_status_only() {
        let (registry, _clock) = registry_with_clock();
        registry
            .register(RegistrationRequest::new("order-service", 4001).with_ip("10.0.0.1"))
            .await;
        let renewed = registry
            .register(
                RegistrationRequest::new("order-service", 4001)
                    .with_ip("10.0.0.99")
                    .with_status(InstanceStatus::Down),
            )
            .await;
        assert_eq!(renewed.status, InstanceStatus::Down);
        assert_eq!(renewed.ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_distinct_ports_are_distinct_instances() {
        let (registry, _clock) = registry_with_clock();
        let a = registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;
        let b = registry
            .register(RegistrationRequest::new("order-service", 4002))
            .await;
        assert_ne!(a.instance_id, b.instance_id);

        let live = registry.service("order-service").await;
        assert_eq!(
            live.iter().map(|i| i.port).collect::<Vec<_>>(),
            vec![4001, 4002]
        );
    }

    #[tokio::test]
    async fn test_expired_lease_is_hidden_but_kept() {
        let (registry, clock) = registry_with_clock();
        registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;
        registry
            .register(RegistrationRequest::new("user-service", 5001))
            .await;

        clock.advance(29_999);
        assert_eq!(registry.service("order-service").await.len(), 1);

        clock.advance(1);
        assert!(registry.service("order-service").await.is_empty());
        assert!(registry.services().await.is_empty());
        assert_eq!(registry.stored_instance_count().await, 2);
    }

    #[tokio::test]
    async fn test_heartbeat_revives_lease() {
        let (registry, clock) = registry_with_clock();
        registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;

        clock.advance(31_000);
        assert!(registry.service("order-service").await.is_empty());

        assert!(registry.heartbeat("order-service", 4001).await);
        assert_eq!(registry.service("order-service").await.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_instance_is_not_found() {
        let (registry, _clock) = registry_with_clock();
        assert!(!registry.heartbeat("order-service", 4001).await);
        registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;
        assert!(!registry.heartbeat("order-service", 4002).await);
        assert_eq!(registry.stored_instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_services_omits_apps_without_live_instances() {
        let (registry, clock) = registry_with_clock();
        registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;
        clock.advance(20_000);
        registry
            .register(RegistrationRequest::new("user-service", 5001))
            .await;
        clock.advance(15_000);

        let services = registry.services().await;
        assert_eq!(services.len(), 1);
        assert!(services.contains_key("user-service"));
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let (registry, _clock) = registry_with_clock();
        registry
            .register(RegistrationRequest::new("order-service", 4001))
            .await;

        assert!(registry.deregister("order-service", 4001).await);
        assert!(!registry.deregister("order-service", 4001).await);
        assert!(!registry.deregister("missing", 1).await);
        assert!(registry.service("order-service").await.is_empty());
        assert_eq!(registry.stored_instance_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_of_same_key_converge() {
        let (registry, _clock) = registry_with_clock();
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(RegistrationRequest::new("order-service", 4001))
                    .await
                    .instance_id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.stored_instance_count().await, 1);
    }
}
