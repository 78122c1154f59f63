use std::path::PathBuf;

use async_trait::async_trait;

use aquaman_core::error::AquamanError;

use crate::store::CredentialStore;

const DEFAULT_CREDENTIALS_DIR: &str = "/run/credentials";

/// Read-only credential backend over systemd's `LoadCredential=`/
/// `SetCredential=` mechanism: each `(service, key)` is a file at
/// `<credentials_dir>/<unit>/<service>.<key>`, decrypted and mounted by
/// systemd before the unit starts. There is no write path — credentials are
/// provisioned out-of-band via the unit file, not by this process.
pub struct SystemdCredsStore {
    credentials_dir: PathBuf,
    unit: String,
}

impl SystemdCredsStore {
    pub fn new(unit: String) -> Self {
        Self {
            credentials_dir: PathBuf::from(DEFAULT_CREDENTIALS_DIR),
            unit,
        }
    }

    #[cfg(test)]
    fn with_credentials_dir(unit: String, credentials_dir: PathBuf) -> Self {
        Self { credentials_dir, unit }
    }

    fn credential_path(&self, service: &str, key: &str) -> PathBuf {
        self.credentials_dir
            .join(&self.unit)
            .join(format!("{service}.{key}"))
    }
}

#[async_trait]
impl CredentialStore for SystemdCredsStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        let path = self.credential_path(service, key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents.trim_end_matches('\n').to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AquamanError::io(format!("failed to read {}", path.display()), err)),
        }
    }

    async fn set(&self, _service: &str, _key: &str, _value: &str) -> Result<(), AquamanError> {
        Err(AquamanError::BackendNotAvailable(
            "systemd-creds credentials are provisioned by the unit file, not at runtime".to_string(),
        ))
    }

    async fn delete(&self, _service: &str, _key: &str) -> Result<bool, AquamanError> {
        Err(AquamanError::BackendNotAvailable(
            "systemd-creds credentials are provisioned by the unit file, not at runtime".to_string(),
        ))
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let dir = self.credentials_dir.join(&self.unit);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(AquamanError::io(format!("failed to read {}", dir.display()), err)),
        };

        let mut pairs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| AquamanError::io(format!("failed to iterate {}", dir.display()), err))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some((service, key)) = name.split_once('.') {
                pairs.push((service.to_string(), key.to_string()));
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_reads_trimmed_file_contents() {
        let temp = tempfile::tempdir().unwrap();
        let unit_dir = temp.path().join("aquaman.service");
        tokio::fs::create_dir_all(&unit_dir).await.unwrap();
        tokio::fs::write(unit_dir.join("anthropic.api_key"), "sk-ant-real\n")
            .await
            .unwrap();

        let store = SystemdCredsStore::with_credentials_dir("aquaman.service".to_string(), temp.path().to_path_buf());
        assert_eq!(
            store.get("anthropic", "api_key").await.unwrap().as_deref(),
            Some("sk-ant-real")
        );
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_credential() {
        let temp = tempfile::tempdir().unwrap();
        let store = SystemdCredsStore::with_credentials_dir("aquaman.service".to_string(), temp.path().to_path_buf());
        assert_eq!(store.get("anthropic", "api_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_is_unsupported() {
        let temp = tempfile::tempdir().unwrap();
        let store = SystemdCredsStore::with_credentials_dir("aquaman.service".to_string(), temp.path().to_path_buf());
        let err = store.set("anthropic", "api_key", "x").await.unwrap_err();
        assert!(matches!(err, AquamanError::BackendNotAvailable(_)));
    }

    #[tokio::test]
    async fn list_enumerates_service_key_pairs_from_unit_directory() {
        let temp = tempfile::tempdir().unwrap();
        let unit_dir = temp.path().join("aquaman.service");
        tokio::fs::create_dir_all(&unit_dir).await.unwrap();
        tokio::fs::write(unit_dir.join("anthropic.api_key"), "a").await.unwrap();
        tokio::fs::write(unit_dir.join("github.token"), "b").await.unwrap();

        let store = SystemdCredsStore::with_credentials_dir("aquaman.service".to_string(), temp.path().to_path_buf());
        let mut pairs = store.list().await.unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("anthropic".to_string(), "api_key".to_string()),
                ("github".to_string(), "token".to_string()),
            ]
        );
    }
}
