use std::{sync::Arc, time::Duration};

use eyre::{Result, WrapErr};
use tokio::time::{MissedTickBehavior, interval};

use crate::{
    adapters::registry_client::RegistryClient,
    config::InstanceConfig,
    core::instance::{InstanceKey, InstanceStatus, RegistrationRequest},
    ports::http_client::HttpClient,
    utils::graceful_shutdown::ShutdownToken,
};

/// Result of one heartbeat cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Registry accepted the heartbeat
    Sent,
    /// Registry does not know this instance (expects a new registration)
    NotRegistered,
    /// Own health endpoint did not report UP; nothing was sent
    SkippedUnhealthy,
    /// Registry could not be reached
    Failed,
}

/// Keeps one process registered: registers it, self-checks its health and
/// heartbeats on an interval, and deregisters it on shutdown.
pub struct InstanceRegistrar {
    config: InstanceConfig,
    registry: RegistryClient,
    http_client: Arc<dyn HttpClient>,
}

impl InstanceRegistrar {
    pub fn new(config: InstanceConfig, http_client: Arc<dyn HttpClient>) -> Result<Self> {
        let registry = RegistryClient::new(
            config.registry_url.clone(),
            Duration::from_millis(config.timeout_ms),
        )
        .wrap_err("Failed to create registry client for instance registration")?;
        Ok(Self {
            config,
            registry,
            http_client,
        })
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.config.app_name.clone(), self.config.port)
    }

    fn health_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.config.ip, self.config.port, self.config.health_check_path
        )
    }

    pub async fn register(&self) -> Result<()> {
        let request = RegistrationRequest::new(self.config.app_name.clone(), self.config.port)
            .with_ip(self.config.ip.clone())
            .with_health_check_path(self.config.health_check_path.clone())
            .with_status(InstanceStatus::Up);

        self.registry.register(&request).await.wrap_err_with(|| {
            format!(
                "Failed to register {} with registry at {}",
                self.config.app_name,
                self.registry.base_url()
            )
        })?;
        tracing::info!(
            app = %self.config.app_name,
            port = self.config.port,
            registry = %self.registry.base_url(),
            "Registered with registry"
        );
        Ok(())
    }

    /// Check own health, then heartbeat if healthy.
    pub async fn heartbeat_once(&self) -> HeartbeatOutcome {
        let health_url = self.health_url();
        match self
            .http_client
            .health_check(&health_url, self.config.timeout_ms)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(app = %self.config.app_name, "Self health check not UP, skipping heartbeat");
                return HeartbeatOutcome::SkippedUnhealthy;
            }
            Err(e) => {
                tracing::warn!(app = %self.config.app_name, error = %e, "Self health check failed, skipping heartbeat");
                return HeartbeatOutcome::SkippedUnhealthy;
            }
        }

        match self.registry.heartbeat(&self.key()).await {
            Ok(true) => {
                tracing::debug!(app = %self.config.app_name, "Heartbeat sent");
                HeartbeatOutcome::Sent
            }
            Ok(false) => {
                tracing::warn!(app = %self.config.app_name, "Registry does not know this instance");
                HeartbeatOutcome::NotRegistered
            }
            Err(e) => {
                tracing::warn!(app = %self.config.app_name, error = %e, "Heartbeat failed");
                HeartbeatOutcome::Failed
            }
        }
    }

    /// Heartbeat loop; returns once shutdown begins, after deregistering.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; registration just happened.
        ticker.tick().await;

        tracing::info!(
            app = %self.config.app_name,
            "Starting heartbeat loop every {:?}",
            period
        );

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => break,
                _ = ticker.tick() => {
                    self.heartbeat_once().await;
                }
            }
        }

        if let Err(e) = self.deregister().await {
            tracing::error!("{:#}", e);
        }
    }

    pub async fn deregister(&self) -> Result<()> {
        self.registry
            .deregister(&self.key())
            .await
            .wrap_err_with(|| format!("Failed to deregister {}", self.config.app_name))?;
        tracing::info!(app = %self.config.app_name, "Deregistered from registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use http::{Request, Response};

    use super::*;
    use crate::ports::http_client::{HttpClientError, HttpClientResult};

    struct FixedHealth(Option<bool>);

    #[async_trait]
    impl HttpClient for FixedHealth {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            Err(HttpClientError::InvalidRequest("unused".to_string()))
        }

        async fn health_check(&self, _url: &str, timeout_ms: u64) -> HttpClientResult<bool> {
            self.0.ok_or(HttpClientError::Timeout(timeout_ms))
        }
    }

    fn config() -> InstanceConfig {
        InstanceConfig {
            registry_url: "http://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            ..InstanceConfig::new("order-service", 4001)
        }
    }

    #[test]
    fn test_health_url_uses_instance_address() {
        let registrar = InstanceRegistrar::new(config(), Arc::new(FixedHealth(Some(true))))
            .unwrap();
        assert_eq!(registrar.health_url(), "http://localhost:4001/health");
        assert_eq!(registrar.key(), InstanceKey::new("order-service", 4001));
    }

    #[tokio::test]
    async fn test_unhealthy_instance_skips_heartbeat() {
        for health in [Some(false), None] {
            let registrar = InstanceRegistrar::new(config(), Arc::new(FixedHealth(health)))
                .unwrap();
            assert_eq!(registrar.heartbeat_once().await, HeartbeatOutcome::SkippedUnhealthy);
        }
    }

    #[tokio::test]
    async fn test_unreachable_registry_fails_heartbeat() {
        let registrar = InstanceRegistrar::new(config(), Arc::new(FixedHealth(Some(true))))
            .unwrap();
        assert_eq!(registrar.heartbeat_once().await, HeartbeatOutcome::Failed);
        assert!(registrar.register().await.is_err());
    }
}
