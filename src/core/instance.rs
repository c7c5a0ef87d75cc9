use std::fmt;

use serde::{Deserialize, Serialize};

fn default_ip() -> String {
    "localhost".to_string()
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

/// Self-reported status of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Up => write!(f, "UP"),
            InstanceStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// A single registered instance of an application.
///
/// Two instances are the same registration when `(app_name, port)` match; the
/// `instance_id` is only an opaque label assigned at first registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub instance_id: String,
    pub app_name: String,
    pub ip: String,
    pub port: u16,
    pub health_check_path: String,
    pub status: InstanceStatus,
    /// Milliseconds since the Unix epoch.
    pub last_heartbeat_at: u64,
}

impl ServiceInstance {
    /// `ip:port` of the instance, as used in log fields and outbound URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Base URL for plain HTTP calls to this instance.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub app_name: String,
    pub port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default = "default_ip")]
    pub ip: String,
}

impl RegistrationRequest {
    pub fn new(app_name: impl Into<String>, port: u16) -> Self {
        Self {
            app_name: app_name.into(),
            port,
            health_check_path: default_health_check_path(),
            status: InstanceStatus::Up,
            ip: default_ip(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Identity of a registration: body of `POST /heartbeat` and `POST /deregister`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    pub app_name: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new(app_name: impl Into<String>, port: u16) -> Self {
        Self {
            app_name: app_name.into(),
            port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_request_defaults() {
        let req: RegistrationRequest =
            serde_json::from_str(r#"{"appName":"order-service","port":4001}"#).unwrap();
        assert_eq!(req.ip, "localhost");
        assert_eq!(req.health_check_path, "/health");
        assert_eq!(req.status, InstanceStatus::Up);
    }

    #[test]
    fn test_instance_wire_format_is_camel_case() {
        let instance = ServiceInstance {
            instance_id: "id-1".to_string(),
            app_name: "order-service".to_string(),
            ip: "10.0.0.7".to_string(),
            port: 4001,
            health_check_path: "/health".to_string(),
            status: InstanceStatus::Down,
            last_heartbeat_at: 17,
        };
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["appName"], "order-service");
        assert_eq!(json["lastHeartbeatAt"], 17);
        assert_eq!(json["status"], "DOWN");
        assert_eq!(instance.base_url(), "http://10.0.0.7:4001");
    }
}
