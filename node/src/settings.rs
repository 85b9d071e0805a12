//! # Node Settings
//!
//! The TOML file the node starts from. It wraps the protocol's
//! [`GatewayConfig`] and adds what only a process needs: where the operator's
//! PEM files live, which address to listen on, and how to log.
//!
//! ```toml
//! [gateway]
//! msp_id = "RegistrarMSP"
//! channel_name = "academic"
//! chaincode_name = "academic-records"
//!
//! [gateway.endpoint]
//! address = "devnet://peer0.registrar.example.edu:7051"
//!
//! [gateway.timeouts]
//! endorse = 15000
//!
//! [operator]
//! owner_id = "registrar-admin"
//! role = "admin"
//! certificate = "/etc/certa/operator.crt"
//! private_key = "/etc/certa/operator.key"
//!
//! # Only read for `devnet://` endpoints.
//! [devnet.msp_roots]
//! RegistrarMSP = "ca/registrar.pem"
//! ```
//!
//! `grpcs://` endpoints need `tls_root`, a PEM bundle for the peer's TLS CA.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use certa_protocol::config::GatewayConfig;
use certa_protocol::identity::{Identity, Role};
use certa_protocol::ledger::DevnetConfig;

use crate::logging::LogFormat;

/// Default port for `/health` and `/metrics`, bound on loopback.
pub const DEFAULT_HTTP_PORT: u16 = 9464;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    pub gateway: GatewayConfig,
    pub operator: OperatorSettings,
    /// PEM bundle for the peer's TLS root, loaded into the endpoint.
    #[serde(default)]
    pub tls_root: Option<PathBuf>,
    #[serde(default)]
    pub devnet: DevnetSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// The identity the node connects as by default.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSettings {
    pub owner_id: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// The in-process ledger used for `devnet://` endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevnetSettings {
    /// MSP id → PEM file of the CA that enrolls its members.
    #[serde(default)]
    pub msp_roots: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
}

fn default_role() -> Role {
    Role::Admin
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], DEFAULT_HTTP_PORT)),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "certa_node=info,certa_protocol=info,tower_http=info".to_string(),
        }
    }
}

impl NodeSettings {
    /// Parses `path`, resolves relative credential paths against the file's
    /// directory, and loads the TLS root if one is named.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut settings: NodeSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        settings.operator.certificate = base.join(&settings.operator.certificate);
        settings.operator.private_key = base.join(&settings.operator.private_key);

        for root in settings.devnet.msp_roots.values_mut() {
            *root = base.join(&*root);
        }

        if let Some(tls_root) = &settings.tls_root {
            let tls_root = base.join(tls_root);
            let pem = std::fs::read(&tls_root)
                .with_context(|| format!("failed to read TLS root {}", tls_root.display()))?;
            settings.gateway.endpoint.tls_root_pem = Some(pem);
        }

        settings
            .gateway
            .validate()
            .with_context(|| format!("invalid [gateway] section in {}", path.display()))?;
        Ok(settings)
    }
}

impl DevnetSettings {
    /// Reads every MSP root into a [`DevnetConfig`].
    pub fn load_config(&self) -> Result<DevnetConfig> {
        let mut config = DevnetConfig::default();
        for (msp_id, path) in &self.msp_roots {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read MSP root {}", path.display()))?;
            config = config
                .with_msp_root(msp_id.as_str(), &pem)
                .with_context(|| format!("invalid MSP root for {msp_id} in {}", path.display()))?;
        }
        Ok(config)
    }
}

impl OperatorSettings {
    /// Reads the PEM files into an [`Identity`] under `msp_id`.
    pub fn load_identity(&self, msp_id: &str) -> Result<Identity> {
        let certificate = std::fs::read(&self.certificate)
            .with_context(|| format!("failed to read certificate {}", self.certificate.display()))?;
        let private_key = std::fs::read(&self.private_key)
            .with_context(|| format!("failed to read private key {}", self.private_key.display()))?;
        Ok(Identity::new(
            self.owner_id.as_str(),
            msp_id,
            certificate,
            private_key,
            self.role.clone(),
        ))
    }
}
