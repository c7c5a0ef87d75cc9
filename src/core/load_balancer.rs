use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::Rng;

use crate::{config::LoadBalanceStrategy, core::instance::ServiceInstance};

/// Trait defining the interface for instance selection strategies
#[async_trait]
pub trait LoadBalancingStrategy: Send + Sync + 'static {
    /// Pick one instance of `app_name` out of `instances`
    async fn select_instance(
        &self,
        app_name: &str,
        instances: &[ServiceInstance],
    ) -> Option<ServiceInstance>;
}

/// Round-robin over each application's instance list.
///
/// Every application gets its own cursor. The cursor is advanced on every
/// selection and reduced modulo the length of the list handed in, so a list
/// that shrinks or grows between calls simply wraps into the new range.
#[derive(Default)]
pub struct RoundRobinStrategy {
    cursors: scc::HashMap<String, AtomicUsize>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoadBalancingStrategy for RoundRobinStrategy {
    async fn select_instance(
        &self,
        app_name: &str,
        instances: &[ServiceInstance],
    ) -> Option<ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let len = instances.len();
        let entry = self
            .cursors
            .entry_async(app_name.to_string())
            .await
            .or_insert_with(|| AtomicUsize::new(0));
        let previous = entry
            .get()
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c + 1) % len))
            .unwrap_or_default();
        drop(entry);

        Some(instances[previous % len].clone())
    }
}

/// Uniformly random selection; stateless.
#[derive(Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LoadBalancingStrategy for RandomStrategy {
    async fn select_instance(
        &self,
        _app_name: &str,
        instances: &[ServiceInstance],
    ) -> Option<ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..instances.len());
        Some(instances[index].clone())
    }
}

/// Holds one instance of every strategy so the strategy can be chosen per call
/// while the round-robin cursors stay shared by all callers in the process.
#[derive(Default)]
pub struct LoadBalancer {
    round_robin: RoundRobinStrategy,
    random: RandomStrategy,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn select_instance(
        &self,
        app_name: &str,
        instances: &[ServiceInstance],
        strategy: LoadBalanceStrategy,
    ) -> Option<ServiceInstance> {
        match strategy {
            LoadBalanceStrategy::RoundRobin => {
                self.round_robin.select_instance(app_name, instances).await
            }
            LoadBalanceStrategy::Random => self.random.select_instance(app_name, instances).await,
        }
    }
}
