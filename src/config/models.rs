//! Configuration data structures for herald.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files and
//! include defaults so that minimal configs remain concise. Field names that
//! mirror the JSON wire format of route and rate-limit definitions are
//! camelCase (`windowMs`, `max`, `uri`, `predicates`, `filters`); process
//! settings are snake_case.
use serde::{Deserialize, Serialize};

fn default_registry_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_gateway_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_registry_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_environment() -> String {
    "Development".to_string()
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_app_name() -> String {
    "api-gateway".to_string()
}

fn default_ip() -> String {
    "localhost".to_string()
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_registry_timeout_ms() -> u64 {
    5_000
}

fn default_cache_ttl_ms() -> u64 {
    10_000
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_exemptions() -> Vec<String> {
    vec!["^/health$".to_string(), "^/auth/.*$".to_string()]
}

/// Settings of the registry process.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_listen_addr")]
    pub listen_addr: String,
    /// How long an instance stays visible without a heartbeat.
    #[serde(default = "default_lease_ttl_ms", alias = "leaseTtlMs")]
    pub lease_ttl_ms: u64,
    /// Reported by `GET /environment`.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_registry_listen_addr(),
            lease_ttl_ms: default_lease_ttl_ms(),
            environment: default_environment(),
        }
    }
}

/// Settings of the gateway process.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Application name used in rate-limit keys and self-registration.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_gateway_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// Timeout of each discovery call to the registry.
    #[serde(default = "default_registry_timeout_ms")]
    pub registry_timeout_ms: u64,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
    #[serde(default)]
    pub global_rate_limit: Option<GlobalRateLimit>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitPolicy>,
    #[serde(default)]
    pub rate_limit_store: RateLimitStoreConfig,
    /// Path regexes that bypass rate limiting and authentication.
    #[serde(default = "default_exemptions")]
    pub rate_limit_exemptions: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub load_balance_strategy: LoadBalanceStrategy,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Registers the gateway itself with the registry when present.
    #[serde(default)]
    pub instance: Option<InstanceConfig>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            listen_addr: default_gateway_listen_addr(),
            registry_url: default_registry_url(),
            registry_timeout_ms: default_registry_timeout_ms(),
            routes: Vec::new(),
            global_rate_limit: None,
            rate_limits: Vec::new(),
            rate_limit_store: RateLimitStoreConfig::default(),
            rate_limit_exemptions: default_exemptions(),
            retry: RetryPolicy::default(),
            load_balance_strategy: LoadBalanceStrategy::default(),
            auth: None,
            instance: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

/// Builder for [`GatewayConfig`], mostly useful when embedding the gateway.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn registry_url(mut self, url: impl Into<String>) -> Self {
        self.config.registry_url = url.into();
        self
    }

    pub fn registry_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.registry_timeout_ms = timeout_ms;
        self
    }

    pub fn route(mut self, route: RouteDefinition) -> Self {
        self.config.routes.push(route);
        self
    }

    pub fn global_rate_limit(mut self, window_ms: u64, max: u64) -> Self {
        self.config.global_rate_limit = Some(GlobalRateLimit { window_ms, max });
        self
    }

    pub fn rate_limit(mut self, service: impl Into<String>, window_ms: u64, max: u64) -> Self {
        self.config.rate_limits.push(RateLimitPolicy {
            service: service.into(),
            window_ms,
            max,
        });
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth = Some(AuthConfig {
            secret: secret.into(),
        });
        self
    }

    pub fn load_balance_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.config.load_balance_strategy = strategy;
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

/// One route as written in configuration.
///
/// ```yaml
/// - id: orders
///   uri: lb://order-service
///   predicates: ["Path=/orders/**"]
///   filters: ["StripPrefix=1"]
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteDefinition {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub predicates: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl RouteDefinition {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            predicates: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

/// Fixed-window limit applied to every non-exempt request per caller.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRateLimit {
    #[serde(rename = "windowMs")]
    pub window_ms: u64,
    pub max: u64,
}

/// Fixed-window limit for requests whose first path segment names `service`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub service: String,
    #[serde(rename = "windowMs")]
    pub window_ms: u64,
    pub max: u64,
}

/// Where rate-limit counters live. Without a Redis URL counters are kept in
/// process, which is only correct for a single gateway node.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RateLimitStoreConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Retry/failover behaviour for one logical call.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Attempts per instance.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * retry_delay_ms` before attempt `n + 1`.
    pub retry_delay_ms: u64,
    /// Move on to the next instance once one is exhausted.
    #[serde(alias = "failoverEnabled")]
    pub failover: bool,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            failover: false,
            timeout_ms: 10_000,
        }
    }
}

/// HS256 bearer verification on the gateway.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub secret: String,
}

/// How a process announces itself to the registry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstanceConfig {
    pub app_name: String,
    pub port: u16,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Timeout for calls to the registry and for the self health check.
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
}

impl InstanceConfig {
    pub fn new(app_name: impl Into<String>, port: u16) -> Self {
        Self {
            app_name: app_name.into(),
            port,
            ip: default_ip(),
            health_check_path: default_health_check_path(),
            registry_url: default_registry_url(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_registry_timeout_ms(),
        }
    }
}

/// Settings for a caller that resolves services through the registry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub load_balance_strategy: LoadBalanceStrategy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            cache_ttl_ms: default_cache_ttl_ms(),
            timeout_ms: default_registry_timeout_ms(),
            retry: RetryPolicy::default(),
            load_balance_strategy: LoadBalanceStrategy::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    #[serde(alias = "ROUND_ROBIN")]
    RoundRobin,
    #[serde(alias = "RANDOM")]
    Random,
}
