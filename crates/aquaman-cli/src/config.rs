use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use zeroize::Zeroizing;

use aquaman_proxy::ProxyConfig;
use aquaman_secret::{CredentialBackendConfig, VaultConfig};

const DEFAULT_ROTATE_BYTES: u64 = 67_108_864;
const DEFAULT_ROTATE_AGE_S: u64 = 86_400;
const DEFAULT_VAULT_TIMEOUT_MS: u64 = 5_000;

/// Top-level on-disk config: the `proxy:`/`credentials:`/`audit:` schema
/// from §6, deserialized straight from TOML. Loaded once by `main` and
/// passed explicitly into `Proxy::new`/`build_store`/`AuditLog::open` — no
/// process-wide config statics, per the design note in spec.md §9.
#[derive(Debug, Deserialize)]
pub struct AquamanConfig {
    pub proxy: ProxyConfig,
    pub credentials: CredentialsConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    pub log_dir: PathBuf,
    #[serde(default = "default_rotate_bytes")]
    pub rotate_bytes: u64,
    #[serde(default = "default_rotate_age_s")]
    pub rotate_age_s: u64,
    /// Resolution of Open Question #1: whether a failed audit write should
    /// fail the request. Defaults to `false` (fail open), matching the
    /// policy in §7.
    #[serde(default)]
    pub fail_closed: bool,
}

fn default_rotate_bytes() -> u64 {
    DEFAULT_ROTATE_BYTES
}

fn default_rotate_age_s() -> u64 {
    DEFAULT_ROTATE_AGE_S
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum CredentialsConfig {
    Keychain {
        index_path: PathBuf,
    },
    #[serde(rename = "1password")]
    OnePassword {
        vault: String,
    },
    Vault {
        address: Option<String>,
        token: Option<String>,
        namespace: Option<String>,
        mount: Option<String>,
        request_timeout_ms: Option<u64>,
    },
    #[serde(rename = "keepassxc")]
    KeepassXc {
        database_path: PathBuf,
    },
    SystemdCreds {
        unit: String,
    },
    EncryptedFile {
        path: PathBuf,
    },
    Memory,
}

impl CredentialsConfig {
    /// Resolves environment fallbacks (`VAULT_ADDR`/`VAULT_TOKEN`/
    /// `VAULT_NAMESPACE`, `AQUAMAN_MASTER_PASSWORD`) and produces the
    /// backend config `aquaman_secret::build_store` expects.
    pub fn into_backend_config(self) -> Result<CredentialBackendConfig> {
        match self {
            Self::Keychain { index_path } => Ok(CredentialBackendConfig::Keychain { index_path }),
            Self::OnePassword { vault } => Ok(CredentialBackendConfig::OnePassword { vault }),
            Self::Vault { address, token, namespace, mount, request_timeout_ms } => {
                let address = address
                    .or_else(|| std::env::var("VAULT_ADDR").ok())
                    .context("vault address not configured: set credentials.address or VAULT_ADDR")?;
                let token = token
                    .or_else(|| std::env::var("VAULT_TOKEN").ok())
                    .context("vault token not configured: set credentials.token or VAULT_TOKEN")?;
                let namespace = namespace.or_else(|| std::env::var("VAULT_NAMESPACE").ok());
                Ok(CredentialBackendConfig::Vault(VaultConfig {
                    address,
                    token,
                    namespace,
                    mount: mount.unwrap_or_else(|| "secret".to_string()),
                    request_timeout_ms: request_timeout_ms.unwrap_or(DEFAULT_VAULT_TIMEOUT_MS),
                }))
            }
            Self::KeepassXc { database_path } => {
                let password = master_password()?;
                Ok(CredentialBackendConfig::KeepassXc { database_path, database_password: password })
            }
            Self::SystemdCreds { unit } => Ok(CredentialBackendConfig::SystemdCreds { unit }),
            Self::EncryptedFile { path } => {
                let password = master_password()?;
                Ok(CredentialBackendConfig::EncryptedFile { path, password })
            }
            Self::Memory => Ok(CredentialBackendConfig::Memory),
        }
    }
}

fn master_password() -> Result<Zeroizing<String>> {
    std::env::var("AQUAMAN_MASTER_PASSWORD")
        .map(Zeroizing::new)
        .context("AQUAMAN_MASTER_PASSWORD must be set for this credential backend")
}

pub fn load(path: &Path) -> Result<AquamanConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
}
