//! Process configuration: role selection, database directory, Postgres
//! pool sizing, TLS material, and per-service ports (§4.7, §4.8).
//!
//! All configuration can be provided via CLI arguments or environment
//! variables (`clap`'s `env` feature); an optional `.env` file is loaded
//! before parsing so its values act as defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use vaultkeep_listener::TlsMaterial;
use vaultkeep_postgres::PgConfig;

const TRACING_TARGET: &str = "vaultkeep_cli::config";

/// Which controller role this process embeds (§1, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[clap(rename_all = "lower")]
pub enum Role {
    /// Local archive + network puller + background daemons; no HTTP
    /// surface (GUI and the small local HTTP services are external
    /// collaborators, §1 Non-goals).
    Client,
    /// Multi-tenant repository: administration, file/tag repositories,
    /// access control (§4.10).
    Server,
}

/// TLS certificate/key paths shared by every service this process hosts
/// (§4.8: "the controller's TLS key/cert material").
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct TlsConfig {
    #[arg(long = "tls-cert", env = "VAULTKEEP_TLS_CERT")]
    pub cert_path: Option<PathBuf>,

    #[arg(long = "tls-key", env = "VAULTKEEP_TLS_KEY")]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.cert_path, &self.key_path) {
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("--tls-cert and --tls-key must be provided together")
            }
            _ => Ok(()),
        }
    }

    pub fn material(&self) -> Option<TlsMaterial> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert_path), Some(key_path)) => {
                Some(TlsMaterial { cert_path: cert_path.clone(), key_path: key_path.clone() })
            }
            _ => None,
        }
    }
}

/// Per-service bind configuration: one port per resource-taxonomy kind
/// (§4.10). A service with no configured port is not hosted.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct ServicePorts {
    /// Admin service port (`/busy`, `/backup`, `/services`, `/shutdown`),
    /// reachable only from loopback (§4.10).
    #[arg(long = "admin-port", env = "VAULTKEEP_ADMIN_PORT")]
    pub admin: Option<u16>,

    #[arg(long = "file-repository-port", env = "VAULTKEEP_FILE_REPOSITORY_PORT")]
    pub file_repository: Option<u16>,

    #[arg(long = "tag-repository-port", env = "VAULTKEEP_TAG_REPOSITORY_PORT")]
    pub tag_repository: Option<u16>,
}

impl ServicePorts {
    pub fn is_empty(&self) -> bool {
        self.admin.is_none() && self.file_repository.is_none() && self.tag_repository.is_none()
    }
}

/// Complete process configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "vaultkeep")]
#[command(about = "vaultkeep runtime kernel: client daemons or server request pipeline")]
#[command(version)]
pub struct Cli {
    /// Which controller role to boot (§1).
    #[arg(long, env = "VAULTKEEP_ROLE", value_enum)]
    pub role: Role,

    /// Directory holding this process's run-marker, and handed to the
    /// database factory (§4.7 init order item 1/3).
    #[arg(long = "db-dir", env = "VAULTKEEP_DB_DIR")]
    pub db_dir: PathBuf,

    /// Host address every hosted service binds to.
    #[arg(long, env = "VAULTKEEP_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[clap(flatten)]
    pub postgres: PgConfig,

    #[clap(flatten)]
    pub tls: TlsConfig,

    /// Server role only: which services to host and on what ports.
    #[clap(flatten)]
    pub ports: ServicePorts,

    /// `User-Agent: vaultkeep/<version>` network version every hosted
    /// service requires of its clients (§4.9 stage 1).
    #[arg(long = "network-version", env = "VAULTKEEP_NETWORK_VERSION", default_value_t = 50)]
    pub network_version: u32,

    /// Origins reflected in CORS responses, shared by every hosted
    /// service (§4.9 "CORS").
    #[arg(long = "cors-origins", env = "VAULTKEEP_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Session key presented to a sibling instance's admin `/shutdown`
    /// endpoint during the sibling-shutdown handshake (§6 "Ports &
    /// discovery"). The handshake itself carries no session of its own,
    /// so a deployment that wants a clean handover provisions this
    /// out-of-band.
    #[arg(long = "admin-session-key", env = "VAULTKEEP_ADMIN_SESSION_KEY")]
    pub admin_session_key: Option<String>,
}

impl Cli {
    /// Loads a `.env` file (if present) before parsing, so its values act
    /// as defaults for `clap`'s `env` lookups.
    pub fn init() -> Self {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("warning: could not load .env file: {err}");
        }
        Self::parse()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.postgres.validate().map_err(anyhow::Error::new)?;
        self.tls.validate()?;
        if self.role == Role::Server && self.ports.is_empty() {
            anyhow::bail!(
                "server role requires at least one of --admin-port, --file-repository-port, --tag-repository-port"
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.host, port)
    }

    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.host {
            IpAddr::V4(addr) => addr.is_unspecified(),
            IpAddr::V6(addr) => addr.is_unspecified(),
        }
    }

    /// Every port this process is configured to bind, in the order a
    /// sibling-shutdown probe should try them (§6 "Ports & discovery").
    pub fn candidate_ports(&self) -> Vec<u16> {
        [self.ports.admin, self.ports.file_repository, self.ports.tag_repository].into_iter().flatten().collect()
    }

    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET,
            role = ?self.role,
            db_dir = %self.db_dir.display(),
            host = %self.host,
            postgres_url = %self.postgres.masked_url(),
            tls_enabled = self.tls.material().is_some(),
            "configuration loaded"
        );
        if self.binds_to_all_interfaces() {
            tracing::warn!(target: TRACING_TARGET, "host is unspecified (binds to all interfaces)");
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { cert_path: None, key_path: None }
    }
}

impl Default for ServicePorts {
    fn default() -> Self {
        Self { admin: None, file_repository: None, tag_repository: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            role: Role::Server,
            db_dir: PathBuf::from("/tmp/vaultkeep"),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            postgres: PgConfig::new("postgresql://localhost/vaultkeep"),
            tls: TlsConfig::default(),
            ports: ServicePorts::default(),
            network_version: 50,
            cors_origins: Vec::new(),
            admin_session_key: None,
        }
    }

    #[test]
    fn server_role_requires_at_least_one_port() {
        let cli = base_cli();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn server_role_with_admin_port_is_valid() {
        let mut cli = base_cli();
        cli.ports.admin = Some(45865);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn client_role_needs_no_ports() {
        let mut cli = base_cli();
        cli.role = Role::Client;
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn tls_cert_without_key_is_rejected() {
        let mut cli = base_cli();
        cli.ports.admin = Some(45865);
        cli.tls.cert_path = Some(PathBuf::from("/tmp/cert.pem"));
        assert!(cli.validate().is_err());
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let cli = base_cli();
        let addr = cli.bind_addr(45865);
        assert_eq!(addr.port(), 45865);
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn candidate_ports_collects_every_configured_port() {
        let mut cli = base_cli();
        cli.ports.admin = Some(1);
        cli.ports.file_repository = Some(2);
        assert_eq!(cli.candidate_ports(), vec![1, 2]);
    }
}
