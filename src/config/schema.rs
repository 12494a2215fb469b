//! Configuration schema definitions.
//!
//! Every section defaults, so an empty file yields a working gateway on
//! `127.0.0.1:8080`.

use std::path::PathBuf;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and request handling.
    pub http: HttpConfig,

    /// Uploaded file staging.
    pub uploads: UploadsConfig,

    /// Ownership applied to staged files.
    pub permissions: PermissionsConfig,

    pub timeouts: TimeoutConfig,

    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub address: String,

    /// Log protocol, host, user agent and friends for every request.
    pub access_logs: bool,

    /// Status returned for dispatch and worker failures.
    pub internal_error_code: u16,

    /// Maximum request body in megabytes, 0 for unlimited.
    pub max_request_size: u64,

    /// Forward form bodies unparsed.
    pub raw_body: bool,

    /// Echo internal error details to clients.
    pub debug: bool,

    /// Peers allowed to set forwarding headers. Empty trusts everyone.
    pub trusted_subnets: Vec<IpNet>,
}

impl HttpConfig {
    /// Body limit in bytes, if any.
    pub fn max_request_bytes(&self) -> Option<usize> {
        if self.max_request_size == 0 {
            return None;
        }
        usize::try_from(self.max_request_size.saturating_mul(1024 * 1024)).ok()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            access_logs: false,
            internal_error_code: 500,
            max_request_size: 0,
            raw_body: false,
            debug: false,
            trusted_subnets: default_trusted_subnets(),
        }
    }
}

fn default_trusted_subnets() -> Vec<IpNet> {
    [
        "10.0.0.0/8",
        "127.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadsConfig {
    /// Directory for spooled and staged files.
    pub dir: PathBuf,

    /// Rejected extensions.
    pub forbid: Vec<String>,

    /// Accepted extensions. When non-empty, only these pass.
    pub allow: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
            forbid: [".php", ".exe", ".bat", ".sh"].map(String::from).to_vec(),
            allow: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed until the response head is produced.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus scrape address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// Bearer token required by every admin endpoint.
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: String::new(),
        }
    }
}
