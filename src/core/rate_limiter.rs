//! Fixed-window admission control in front of the gateway routes.
//!
//! Counters live in a [`CounterStore`] shared by every gateway node. Each
//! counter is created with an expiry equal to its window; the increment that
//! creates the key is the only one that sets the expiry, so a window is fixed
//! from the first request in it. Up to `2 * max` requests can therefore pass
//! around a window boundary.
use std::{sync::Arc, time::Duration};

use regex::Regex;

use crate::{
    config::{GlobalRateLimit, RateLimitPolicy},
    core::{CoreError, CoreResult},
    ports::counter_store::CounterStore,
};

pub const GLOBAL_LIMIT_MESSAGE: &str = "Global rate limit exceeded.";

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Path matched an exemption; no counter was touched.
    Exempt,
}

pub struct RateLimiter {
    app_name: String,
    global: Option<GlobalRateLimit>,
    services: Vec<RateLimitPolicy>,
    exemptions: Vec<Regex>,
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(app_name: impl Into<String>, store: Arc<dyn CounterStore>) -> Self {
        Self {
            app_name: app_name.into(),
            global: None,
            services: Vec::new(),
            exemptions: Vec::new(),
            store,
        }
    }

    pub fn with_global(mut self, global: Option<GlobalRateLimit>) -> Self {
        self.global = global;
        self
    }

    pub fn with_service_limits(mut self, services: Vec<RateLimitPolicy>) -> Self {
        self.services = services;
        self
    }

    /// Compile exemption patterns; the first invalid one is reported.
    pub fn with_exemptions<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, regex::Error> {
        self.exemptions = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exemptions.iter().any(|re| re.is_match(path))
    }

    /// Target service of a request path: its first segment.
    pub fn service_of(path: &str) -> Option<&str> {
        path.trim_start_matches('/')
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
    }

    pub fn global_key(&self, caller: &str) -> String {
        format!("rl:global:{}:{}", self.app_name, caller)
    }

    pub fn service_key(&self, service: &str, caller: &str) -> String {
        format!("rl:{}:{}:{}", self.app_name, service, caller)
    }

    /// Count this request against the global window and then against the
    /// window of its target service, rejecting at the first one exceeded.
    pub async fn check(&self, path: &str, caller: &str) -> CoreResult<Admission> {
        if self.is_exempt(path) {
            return Ok(Admission::Exempt);
        }

        if let Some(global) = &self.global {
            let count = self
                .increment(&self.global_key(caller), global.window_ms)
                .await?;
            if count > global.max {
                tracing::debug!(caller, count, max = global.max, "Global rate limit exceeded");
                return Err(CoreError::RateLimited(GLOBAL_LIMIT_MESSAGE.to_string()));
            }
        }

        if let Some(service) = Self::service_of(path)
            && let Some(policy) = self.services.iter().find(|p| p.service == service)
        {
            let count = self
                .increment(&self.service_key(service, caller), policy.window_ms)
                .await?;
            if count > policy.max {
                tracing::debug!(caller, service, count, max = policy.max, "Service rate limit exceeded");
                return Err(CoreError::RateLimited(format!(
                    "Rate limit exceeded for service: {service}"
                )));
            }
        }

        Ok(Admission::Admitted)
    }

    async fn increment(&self, key: &str, window_ms: u64) -> CoreResult<u64> {
        self.store
            .increment(key, Duration::from_millis(window_ms))
            .await
            .map_err(|e| {
                tracing::error!(key, error = %e, "Rate limit counter store failed");
                CoreError::CounterStore(e.to_string())
            })
    }
}
