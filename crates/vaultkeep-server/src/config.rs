//! Per-service configuration consulted by the restrictions and CORS
//! stages of the request pipeline (§4.9, §6 "Required headers").

use clap::Args;
use serde::{Deserialize, Serialize};

/// Everything the restrictions/render stages need to know about the
/// service a request landed on: what it calls itself for the `Server`
/// header, what network version it speaks, whether it is reachable only
/// from loopback, and whether it opts into CORS.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct ServiceConfig {
    /// Identifier placed in the `Server: <service-type>/<network-version>`
    /// response header, e.g. "file repository", "server administration".
    #[arg(long = "service-type", env = "VAULTKEEP_SERVICE_TYPE")]
    pub service_type: String,

    /// Network protocol version this service speaks. Requests whose
    /// `User-Agent: hydrus/<version>` header disagrees are rejected with
    /// `426 NetworkVersion` (§4.9 stage 1).
    #[arg(long = "network-version", env = "VAULTKEEP_NETWORK_VERSION", default_value = "50")]
    pub network_version: u32,

    /// If set, only loopback client addresses may reach this service
    /// (used for `/shutdown`, `/busy`; §4.10 admin resource).
    #[arg(long = "local-only", env = "VAULTKEEP_LOCAL_ONLY", default_value = "false")]
    pub local_only: bool,

    /// Origins this service reflects in CORS responses. Empty means the
    /// service does not support CORS at all: any `OPTIONS`/request
    /// bearing `Origin` is rejected with `401 DoesNotSupportCORS`
    /// (§4.9 "CORS").
    #[arg(long = "cors-origins", env = "VAULTKEEP_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

impl ServiceConfig {
    pub fn new(service_type: impl Into<String>, network_version: u32) -> Self {
        Self {
            service_type: service_type.into(),
            network_version,
            local_only: false,
            cors_origins: Vec::new(),
        }
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    #[inline]
    pub fn cors_enabled(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    #[inline]
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.cors_origins.iter().any(|allowed| allowed == "*" || allowed == origin)
    }

    /// The `Server:` header value every response must carry (§6).
    pub fn server_header(&self) -> String {
        format!("{}/{}", self.service_type, self.network_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_header_combines_type_and_version() {
        let config = ServiceConfig::new("file repository", 50);
        assert_eq!(config.server_header(), "file repository/50");
    }

    #[test]
    fn cors_disabled_by_default() {
        let config = ServiceConfig::new("server administration", 50);
        assert!(!config.cors_enabled());
        assert!(!config.allows_origin("https://example.com"));
    }

    #[test]
    fn cors_origin_allowlist() {
        let config = ServiceConfig::new("client api", 50).with_cors_origins(vec!["https://example.com".into()]);
        assert!(config.cors_enabled());
        assert!(config.allows_origin("https://example.com"));
        assert!(!config.allows_origin("https://evil.example"));
    }

    #[test]
    fn wildcard_cors_origin() {
        let config = ServiceConfig::new("client api", 50).with_cors_origins(vec!["*".into()]);
        assert!(config.allows_origin("https://anything.example"));
    }
}
