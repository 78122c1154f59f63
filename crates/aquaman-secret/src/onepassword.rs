use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;

use aquaman_core::error::AquamanError;

use crate::store::CredentialStore;

const DEFAULT_OP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OP_EXECUTABLE: &str = "op";

/// Fields every 1Password password item carries that are not aquaman
/// credential slots.
const RESERVED_FIELD_LABELS: &[&str] = &["notesPlain", "username", "password"];

/// Credential backend that shells out to the 1Password CLI (`op`). Items are
/// addressed as `op://<vault>/<service>/<key>`: one item per service,
/// titled `<service>`, one field per key. Every invocation is serialized
/// behind an internal async mutex because `op` relies on a single
/// biometric/session unlock and concurrent invocations can race on its
/// session cache.
pub struct OnePasswordStore {
    executable: String,
    vault: String,
    timeout: Duration,
    lock: AsyncMutex<()>,
}

impl OnePasswordStore {
    pub fn new(vault: String) -> Self {
        Self {
            executable: DEFAULT_OP_EXECUTABLE.to_string(),
            vault,
            timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            lock: AsyncMutex::new(()),
        }
    }

    #[cfg(test)]
    fn with_executable(vault: String, executable: String) -> Self {
        Self {
            executable,
            vault,
            timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            lock: AsyncMutex::new(()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, AquamanError> {
        let _guard = self.lock.lock().await;

        let mut command = Command::new(&self.executable);
        command.kill_on_drop(true);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let child = command.spawn().map_err(|err| {
            AquamanError::BackendNotAvailable(format!("failed to spawn '{}': {err}", self.executable))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AquamanError::BackendTransient("op command timed out".to_string()))?
            .map_err(|err| AquamanError::io("failed to read op output".to_string(), err))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            map_op_failure(&stderr)
        }
    }

    fn field_ref(&self, service: &str, key: &str) -> String {
        format!("op://{}/{service}/{key}", self.vault)
    }
}

fn map_op_failure<T>(stderr: &str) -> Result<T, AquamanError> {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("isn't an item") || lowered.contains("not found") || lowered.contains("no such") {
        Err(AquamanError::CredentialMissing { service: stderr.trim().to_string() })
    } else if lowered.contains("not signed in") || lowered.contains("authentication") || lowered.contains("unlock") {
        Err(AquamanError::BackendNotAvailable(stderr.trim().to_string()))
    } else {
        Err(AquamanError::BackendTransient(stderr.trim().to_string()))
    }
}

#[async_trait]
impl CredentialStore for OnePasswordStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        match self.run(&["read", &self.field_ref(service, key)]).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
            Err(AquamanError::CredentialMissing { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError> {
        let item_exists = self
            .run(&["item", "get", service, "--vault", &self.vault])
            .await
            .is_ok();
        let assignment = format!("{key}={value}");
        if item_exists {
            self.run(&["item", "edit", service, "--vault", &self.vault, &assignment])
                .await?;
        } else {
            self.run(&[
                "item",
                "create",
                "--category",
                "password",
                "--title",
                service,
                "--vault",
                &self.vault,
                &assignment,
            ])
            .await?;
        }
        Ok(())
    }

    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError> {
        let field_deletion = format!("{key}[delete]");
        match self
            .run(&["item", "edit", service, "--vault", &self.vault, &field_deletion])
            .await
        {
            Ok(_) => Ok(true),
            Err(AquamanError::CredentialMissing { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let bytes = self
            .run(&["item", "list", "--vault", &self.vault, "--format", "json"])
            .await?;
        let items: Vec<serde_json::Value> = serde_json::from_slice(&bytes)
            .map_err(|err| AquamanError::BackendTransient(format!("malformed op item list: {err}")))?;

        let mut pairs = Vec::new();
        for item in items {
            let Some(service) = item.get("title").and_then(|t| t.as_str()) else {
                continue;
            };
            let detail = self
                .run(&["item", "get", service, "--vault", &self.vault, "--format", "json"])
                .await?;
            let detail: serde_json::Value = serde_json::from_slice(&detail)
                .map_err(|err| AquamanError::BackendTransient(format!("malformed op item detail: {err}")))?;
            let Some(fields) = detail.get("fields").and_then(|f| f.as_array()) else {
                continue;
            };
            for field in fields {
                let Some(label) = field.get("label").and_then(|l| l.as_str()) else {
                    continue;
                };
                if !RESERVED_FIELD_LABELS.contains(&label) {
                    pairs.push((service.to_string(), label.to_string()));
                }
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ref_uses_op_uri_scheme() {
        let store = OnePasswordStore::new("Private".to_string());
        assert_eq!(store.field_ref("anthropic", "api_key"), "op://Private/anthropic/api_key");
    }

    #[tokio::test]
    async fn missing_op_binary_reports_backend_not_available() {
        let store = OnePasswordStore::with_executable(
            "Private".to_string(),
            "definitely-not-a-real-binary-xyz".to_string(),
        );
        let err = store.get("anthropic", "api_key").await.unwrap_err();
        assert!(matches!(err, AquamanError::BackendNotAvailable(_)));
    }

    #[test]
    fn map_op_failure_classifies_auth_errors_as_not_available() {
        let err: Result<Vec<u8>, AquamanError> = map_op_failure("[ERROR] 2024/01/01 you are not signed in");
        assert!(matches!(err.unwrap_err(), AquamanError::BackendNotAvailable(_)));
    }

    #[test]
    fn map_op_failure_classifies_missing_item_as_credential_missing() {
        let err: Result<Vec<u8>, AquamanError> = map_op_failure("[ERROR] \"anthropic\" isn't an item");
        assert!(matches!(err.unwrap_err(), AquamanError::CredentialMissing { .. }));
    }
}
