use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use keyring::Entry;

use aquaman_core::error::AquamanError;
use aquaman_core::write_text_atomic;

use crate::store::CredentialStore;

const KEYCHAIN_SERVICE_PREFIX: &str = "aquaman-";

fn keychain_service_name(service: &str) -> String {
    format!("{KEYCHAIN_SERVICE_PREFIX}{service}")
}

fn map_keyring_error(err: keyring::Error) -> AquamanError {
    match err {
        keyring::Error::NoEntry => AquamanError::BackendTransient("keychain entry not found".to_string()),
        keyring::Error::NoStorageAccess(source) => {
            tracing::warn!(error = %source, "keychain locked or inaccessible");
            AquamanError::BackendPermissionDenied(format!("keychain locked or inaccessible: {source}"))
        }
        other => AquamanError::BackendTransient(format!("keychain error: {other}")),
    }
}

/// Credential backend over the platform's native secret service (macOS
/// Keychain, Windows Credential Manager, libsecret on Linux), via the
/// `keyring` crate. Item service name is `aquaman-<service>`, account is
/// `<key>`.
///
/// The `keyring` crate has no portable enumeration API, so `list` is backed
/// by a small sidecar index file (`<index_path>`) recording every
/// `(service, key)` pair this process has written — the index never holds
/// secret material, only the pair names.
pub struct KeychainStore {
    index_path: PathBuf,
    index: Mutex<BTreeSet<(String, String)>>,
}

impl KeychainStore {
    pub fn open(index_path: PathBuf) -> Result<Self, AquamanError> {
        let index = load_index(&index_path)?;
        Ok(Self {
            index_path,
            index: Mutex::new(index),
        })
    }

    fn entry(&self, service: &str, key: &str) -> Result<Entry, AquamanError> {
        Entry::new(&keychain_service_name(service), key).map_err(map_keyring_error)
    }

    fn remember(&self, service: &str, key: &str) -> Result<(), AquamanError> {
        let mut index = self.index.lock().expect("keychain index lock poisoned");
        index.insert((service.to_string(), key.to_string()));
        save_index(&self.index_path, &index)
    }

    fn forget(&self, service: &str, key: &str) -> Result<(), AquamanError> {
        let mut index = self.index.lock().expect("keychain index lock poisoned");
        index.remove(&(service.to_string(), key.to_string()));
        save_index(&self.index_path, &index)
    }
}

fn load_index(path: &PathBuf) -> Result<BTreeSet<(String, String)>, AquamanError> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AquamanError::io(format!("failed to read {}", path.display()), err))?;
    serde_json::from_str(&raw)
        .map_err(|err| AquamanError::bad_input(format!("malformed keychain index: {err}")))
}

fn save_index(path: &PathBuf, index: &BTreeSet<(String, String)>) -> Result<(), AquamanError> {
    let encoded = serde_json::to_string_pretty(index)
        .map_err(|err| AquamanError::bad_input(format!("failed to encode keychain index: {err}")))?;
    write_text_atomic(path, &encoded)
}

#[async_trait]
impl CredentialStore for KeychainStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        match self.entry(service, key)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(map_keyring_error(err)),
        }
    }

    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError> {
        self.entry(service, key)?
            .set_password(value)
            .map_err(map_keyring_error)?;
        self.remember(service, key)
    }

    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError> {
        match self.entry(service, key)?.delete_credential() {
            Ok(()) => {
                self.forget(service, key)?;
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(map_keyring_error(err)),
        }
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let index = self.index.lock().expect("keychain index lock poisoned");
        Ok(index.iter().cloned().collect())
    }
}
