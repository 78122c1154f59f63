pub mod encrypted_file;
pub mod keepassxc;
pub mod keychain;
pub mod memory;
pub mod onepassword;
pub mod store;
pub mod systemd_creds;
pub mod vault;

use std::path::PathBuf;
use std::sync::Arc;

use zeroize::Zeroizing;

use aquaman_core::error::AquamanError;

pub use store::{env_override_name, resolve_credential, CredentialStore};
pub use vault::VaultConfig;

/// Selects exactly one concrete backend for the process lifetime. Modeled
/// as a sealed variant rather than a duck-typed registry: the proxy picks
/// one arm at startup and holds the resulting `Arc<dyn CredentialStore>` for
/// as long as it runs, never switching backends mid-request.
#[derive(Debug, Clone)]
pub enum CredentialBackendConfig {
    Keychain {
        index_path: PathBuf,
    },
    EncryptedFile {
        path: PathBuf,
        password: Zeroizing<String>,
    },
    Memory,
    OnePassword {
        vault: String,
    },
    Vault(VaultConfig),
    KeepassXc {
        database_path: PathBuf,
        database_password: Zeroizing<String>,
    },
    SystemdCreds {
        unit: String,
    },
}

/// Builds the configured backend as a trait object. Called once at startup.
pub fn build_store(config: CredentialBackendConfig) -> Result<Arc<dyn CredentialStore>, AquamanError> {
    let store: Arc<dyn CredentialStore> = match config {
        CredentialBackendConfig::Keychain { index_path } => Arc::new(keychain::KeychainStore::open(index_path)?),
        CredentialBackendConfig::EncryptedFile { path, password } => {
            Arc::new(encrypted_file::EncryptedFileStore::new(path, password))
        }
        CredentialBackendConfig::Memory => Arc::new(memory::MemoryStore::new()),
        CredentialBackendConfig::OnePassword { vault } => Arc::new(onepassword::OnePasswordStore::new(vault)),
        CredentialBackendConfig::Vault(vault_config) => Arc::new(vault::VaultStore::new(vault_config)?),
        CredentialBackendConfig::KeepassXc { database_path, database_password } => {
            Arc::new(keepassxc::KeepassXcStore::new(database_path, database_password))
        }
        CredentialBackendConfig::SystemdCreds { unit } => Arc::new(systemd_creds::SystemdCredsStore::new(unit)),
    };
    Ok(store)
}
