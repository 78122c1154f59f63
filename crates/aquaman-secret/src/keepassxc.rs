use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use zeroize::Zeroizing;

use aquaman_core::error::AquamanError;

use crate::store::CredentialStore;

const DEFAULT_KEEPASSXC_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KEEPASSXC_EXECUTABLE: &str = "keepassxc-cli";

fn entry_path(service: &str, key: &str) -> String {
    format!("{service}/{key}")
}

/// Credential backend that shells out to `keepassxc-cli` against a single
/// `.kdbx` database. Entries are titled `<service>/<key>`; the database
/// password is piped over stdin on every invocation so it never appears in
/// argv or the process environment.
pub struct KeepassXcStore {
    executable: String,
    database_path: PathBuf,
    database_password: Zeroizing<String>,
    timeout: Duration,
    lock: AsyncMutex<()>,
}

impl KeepassXcStore {
    pub fn new(database_path: PathBuf, database_password: Zeroizing<String>) -> Self {
        Self {
            executable: DEFAULT_KEEPASSXC_EXECUTABLE.to_string(),
            database_path,
            database_password,
            timeout: Duration::from_millis(DEFAULT_KEEPASSXC_TIMEOUT_MS),
            lock: AsyncMutex::new(()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, AquamanError> {
        self.run_with_extra_stdin(args, &[]).await
    }

    /// Runs `keepassxc-cli <args> <database_path>`, writing the database
    /// password followed by `extra_lines` (e.g. a new entry password for
    /// `add -p`/`edit -p`) to stdin, one per line.
    async fn run_with_extra_stdin(&self, args: &[&str], extra_lines: &[&str]) -> Result<Vec<u8>, AquamanError> {
        let _guard = self.lock.lock().await;

        let mut command = Command::new(&self.executable);
        command.kill_on_drop(true);
        command.args(args);
        command.arg(&self.database_path);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| {
            AquamanError::BackendNotAvailable(format!("failed to spawn '{}': {err}", self.executable))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut payload = self.database_password.as_bytes().to_vec();
            payload.push(b'\n');
            for line in extra_lines {
                payload.extend_from_slice(line.as_bytes());
                payload.push(b'\n');
            }
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| AquamanError::io("failed to write keepassxc-cli stdin".to_string(), err))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AquamanError::BackendTransient("keepassxc-cli command timed out".to_string()))?
            .map_err(|err| AquamanError::io("failed to read keepassxc-cli output".to_string(), err))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            map_keepassxc_failure(&stderr)
        }
    }
}

fn map_keepassxc_failure<T>(stderr: &str) -> Result<T, AquamanError> {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("could not find entry") || lowered.contains("no such entry") {
        Err(AquamanError::CredentialMissing { service: stderr.trim().to_string() })
    } else if lowered.contains("wrong password") || lowered.contains("invalid credentials") {
        Err(AquamanError::BackendPermissionDenied(stderr.trim().to_string()))
    } else {
        Err(AquamanError::BackendTransient(stderr.trim().to_string()))
    }
}

#[async_trait]
impl CredentialStore for KeepassXcStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        let entry = entry_path(service, key);
        match self.run(&["show", "-s", "-a", "Password", &entry]).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
            Err(AquamanError::CredentialMissing { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError> {
        let entry = entry_path(service, key);
        let exists = self.get(service, key).await?.is_some();
        let subcommand = if exists { "edit" } else { "add" };
        self.run_with_extra_stdin(&[subcommand, "-p", &entry], &[value, value])
            .await?;
        Ok(())
    }

    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError> {
        let entry = entry_path(service, key);
        match self.run(&["rm", &entry]).await {
            Ok(_) => Ok(true),
            Err(AquamanError::CredentialMissing { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let bytes = self.run(&["ls", "-R"]).await?;
        let text = String::from_utf8_lossy(&bytes);
        let mut pairs = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if let Some((service, key)) = trimmed.split_once('/') {
                if !service.is_empty() && !key.is_empty() {
                    pairs.push((service.to_string(), key.to_string()));
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
    fn entry_path_joins_service_and_key_with_slash() {
        assert_eq!(entry_path("anthropic", "api_key"), "anthropic/api_key");
    }

    #[tokio::test]
    async fn missing_keepassxc_cli_reports_backend_not_available() {
        let store = KeepassXcStore {
            executable: "definitely-not-a-real-binary-xyz".to_string(),
            database_path: PathBuf::from("/tmp/does-not-matter.kdbx"),
            database_password: Zeroizing::new("hunter2".to_string()),
            timeout: Duration::from_millis(DEFAULT_KEEPASSXC_TIMEOUT_MS),
            lock: AsyncMutex::new(()),
        };
        let err = store.run(&["ls"]).await.unwrap_err();
        assert!(matches!(err, AquamanError::BackendNotAvailable(_)));
    }

    #[test]
    fn map_keepassxc_failure_classifies_missing_entry() {
        let err: Result<Vec<u8>, AquamanError> = map_keepassxc_failure("Could not find entry with path anthropic/api_key.");
        assert!(matches!(err.unwrap_err(), AquamanError::CredentialMissing { .. }));
    }
}
