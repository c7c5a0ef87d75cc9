use std::net::SocketAddr;

use regex::Regex;

use crate::{
    config::models::{
        DiscoveryConfig, GatewayConfig, InstanceConfig, RegistryConfig, RetryPolicy,
    },
    core::route::RouteTable,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid route: {message}")]
    InvalidRoute { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Checks registry and gateway configurations before any server starts.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_registry(config: &RegistryConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }
        if config.lease_ttl_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "lease_ttl_ms".to_string(),
                message: "Lease TTL must be greater than 0".to_string(),
            });
        }

        Self::finish(errors)
    }

    pub fn validate_gateway(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }
        if config.app_name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "app_name".to_string(),
            });
        }
        if let Err(e) = Self::validate_url(&config.registry_url, "registry_url") {
            errors.push(e);
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        } else if let Err(e) = RouteTable::build(&config.routes) {
            errors.push(ValidationError::InvalidRoute {
                message: e.to_string(),
            });
        }

        if let Some(global) = &config.global_rate_limit
            && let Err(e) = Self::validate_window("global_rate_limit", global.window_ms, global.max)
        {
            errors.push(e);
        }
        for (i, policy) in config.rate_limits.iter().enumerate() {
            let field = format!("rate_limits[{i}]");
            if policy.service.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("{field}.service"),
                });
            }
            if let Err(e) = Self::validate_window(&field, policy.window_ms, policy.max) {
                errors.push(e);
            }
        }
        for pattern in &config.rate_limit_exemptions {
            if let Err(e) = Regex::new(pattern) {
                errors.push(ValidationError::InvalidField {
                    field: "rate_limit_exemptions".to_string(),
                    message: format!("Invalid regex '{pattern}': {e}"),
                });
            }
        }
        if let Some(url) = &config.rate_limit_store.redis_url
            && let Err(e) = Self::validate_redis_url(url)
        {
            errors.push(e);
        }

        errors.extend(Self::validate_retry(&config.retry, "retry"));

        if let Some(auth) = &config.auth
            && auth.secret.is_empty()
        {
            errors.push(ValidationError::InvalidField {
                field: "auth.secret".to_string(),
                message: "Secret must not be empty".to_string(),
            });
        }

        if let Some(instance) = &config.instance {
            errors.extend(Self::validate_instance(instance));
        }

        if config.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if config.registry_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "registry_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Self::finish(errors)
    }

    pub fn validate_discovery(config: &DiscoveryConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_url(&config.registry_url, "registry_url") {
            errors.push(e);
        }
        if config.cache_ttl_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "cache_ttl_ms".to_string(),
                message: "Cache TTL must be greater than 0".to_string(),
            });
        }
        errors.extend(Self::validate_retry(&config.retry, "retry"));

        Self::finish(errors)
    }

    fn finish(errors: Vec<ValidationError>) -> ValidationResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_redis_url(url_str: &str) -> ValidationResult<()> {
        let field = "rate_limit_store.redis_url".to_string();
        match url::Url::parse(url_str) {
            Ok(url) if matches!(url.scheme(), "redis" | "rediss") => Ok(()),
            Ok(url) => Err(ValidationError::InvalidField {
                field,
                message: format!("URL scheme must be 'redis' or 'rediss', got '{}'", url.scheme()),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field,
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_window(field: &str, window_ms: u64, max: u64) -> ValidationResult<()> {
        if window_ms == 0 {
            return Err(ValidationError::InvalidField {
                field: format!("{field}.windowMs"),
                message: "Window must be greater than 0".to_string(),
            });
        }
        if max == 0 {
            return Err(ValidationError::InvalidField {
                field: format!("{field}.max"),
                message: "Max requests must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_retry(policy: &RetryPolicy, field: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if policy.max_retries == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.maxRetries"),
                message: "At least one attempt is required".to_string(),
            });
        }
        if policy.timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.timeoutMs"),
                message: "Timeout must be greater than 0".to_string(),
            });
        }
        errors
    }

    fn validate_instance(instance: &InstanceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if instance.app_name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "instance.app_name".to_string(),
            });
        }
        if instance.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: "instance.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            });
        }
        if !instance.health_check_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "instance.health_check_path".to_string(),
                message: "Health check path must start with '/'".to_string(),
            });
        }
        if let Err(e) = Self::validate_url(&instance.registry_url, "instance.registry_url") {
            errors.push(e);
        }
        if instance.heartbeat_interval_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "instance.heartbeat_interval_ms".to_string(),
                message: "Heartbeat interval must be greater than 0".to_string(),
            });
        }
        errors
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
