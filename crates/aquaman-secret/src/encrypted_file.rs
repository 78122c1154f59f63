use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use zeroize::Zeroizing;

use aquaman_core::crypto::{decrypt_with_password, encrypt_with_password};
use aquaman_core::error::AquamanError;
use aquaman_core::write_text_atomic;

use crate::store::CredentialStore;

const MASTER_PASSWORD_ENV_VAR: &str = "AQUAMAN_MASTER_PASSWORD";
const SCHEMA_VERSION: u32 = 1;

/// Reads the master password from the process environment. The encrypted-file
/// backend never persists the password; callers without an env var set must
/// fall back to an interactive prompt (a CLI/TUI concern, out of scope here).
pub fn resolve_master_password_from_env() -> Result<Zeroizing<String>, AquamanError> {
    std::env::var(MASTER_PASSWORD_ENV_VAR)
        .map(Zeroizing::new)
        .map_err(|_| {
            AquamanError::BackendNotAvailable(format!(
                "{MASTER_PASSWORD_ENV_VAR} is not set and no interactive prompt is available"
            ))
        })
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct VaultFile {
    schema_version: u32,
    #[serde(flatten)]
    services: BTreeMap<String, BTreeMap<String, String>>,
}

/// Single encrypted file at `<config_dir>/credentials.enc`, containing
/// `encrypt_with_password(json({service:{key:value}}), master_password)`.
pub struct EncryptedFileStore {
    path: PathBuf,
    password: Zeroizing<String>,
}

impl EncryptedFileStore {
    pub fn new(path: PathBuf, password: Zeroizing<String>) -> Self {
        Self { path, password }
    }

    fn load(&self) -> Result<VaultFile, AquamanError> {
        if !self.path.exists() {
            return Ok(VaultFile {
                schema_version: SCHEMA_VERSION,
                services: BTreeMap::new(),
            });
        }
        let blob = std::fs::read_to_string(&self.path)
            .map_err(|err| AquamanError::io(format!("failed to read {}", self.path.display()), err))?;
        let plaintext = decrypt_with_password(blob.trim(), &self.password)?;
        let parsed: VaultFile = serde_json::from_slice(&plaintext)
            .map_err(|err| AquamanError::BadCiphertext(format!("malformed vault contents: {err}")))?;
        if parsed.schema_version != SCHEMA_VERSION {
            return Err(AquamanError::BadCiphertext(format!(
                "unsupported credential vault schema_version {} (expected {})",
                parsed.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(parsed)
    }

    fn save(&self, vault: &VaultFile) -> Result<(), AquamanError> {
        let plaintext = serde_json::to_vec(vault)
            .map_err(|err| AquamanError::bad_input(format!("failed to encode vault: {err}")))?;
        let blob = encrypt_with_password(&plaintext, &self.password)?;
        write_text_atomic(&self.path, &blob)
    }
}

#[async_trait]
impl CredentialStore for EncryptedFileStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        let vault = self.load()?;
        Ok(vault
            .services
            .get(service)
            .and_then(|slots| slots.get(key))
            .cloned())
    }

    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError> {
        let mut vault = self.load()?;
        vault
            .services
            .entry(service.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.save(&vault)
    }

    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError> {
        let mut vault = self.load()?;
        let removed = vault
            .services
            .get_mut(service)
            .map(|slots| slots.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            self.save(&vault)?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let vault = self.load()?;
        Ok(vault
            .services
            .iter()
            .flat_map(|(service, slots)| {
                slots.keys().map(move |key| (service.clone(), key.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(path: PathBuf) -> EncryptedFileStore {
        EncryptedFileStore::new(path, Zeroizing::new("correct horse battery staple!".to_string()))
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_disk() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("credentials.enc");
        let store = store(path);
        store.set("anthropic", "api_key", "sk-ant-real").await.unwrap();
        assert_eq!(
            store.get("anthropic", "api_key").await.unwrap().as_deref(),
            Some("sk-ant-real")
        );
    }

    #[tokio::test]
    async fn wrong_password_fails_closed() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("credentials.enc");
        store(path.clone()).set("anthropic", "api_key", "sk-ant-real").await.unwrap();

        let wrong = EncryptedFileStore::new(path, Zeroizing::new("totally wrong password!!".to_string()));
        let err = wrong.get("anthropic", "api_key").await.unwrap_err();
        assert!(matches!(err, AquamanError::BadCiphertext(_)));
    }

    #[tokio::test]
    async fn missing_file_returns_empty_store() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("missing.enc");
        let store = store(path);
        assert_eq!(store.get("anthropic", "api_key").await.unwrap(), None);
        assert_eq!(store.list().await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn delete_removes_entry_and_persists() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("credentials.enc");
        let store = store(path);
        store.set("github", "token", "ghp_abc").await.unwrap();
        assert!(store.delete("github", "token").await.unwrap());
        assert_eq!(store.get("github", "token").await.unwrap(), None);
    }
}
