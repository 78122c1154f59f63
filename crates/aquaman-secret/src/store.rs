use async_trait::async_trait;

use aquaman_core::error::AquamanError;

/// Uniform contract every credential backend implements. `service`/`key`
/// namespacing is the backend's responsibility (§4.B names the convention
/// for each concrete backend).
///
/// Backends are dispatched as a trait object (`Arc<dyn CredentialStore>`),
/// not cycled through at request time — the proxy resolves exactly one
/// backend at startup and holds it for the process lifetime.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Looks up `(service, key)`. `Ok(None)` means the slot is genuinely
    /// absent, distinct from a backend failure.
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError>;

    /// Writes `(service, key) = value`. Backends that cannot be written to
    /// out-of-band (systemd-creds) return `AquamanError::BackendNotAvailable`.
    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError>;

    /// Removes `(service, key)`. Returns whether an entry was present.
    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError>;

    /// Enumerates every `(service, key)` pair this backend knows about.
    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError>;

    /// Releases any held resources (file handles, subprocess pools). Most
    /// backends have nothing to do here.
    async fn close(&self) -> Result<(), AquamanError> {
        Ok(())
    }
}

/// Reads a per-credential override of the form `AQUAMAN_<SERVICE>_<KEY>`
/// (uppercase, non-alphanumeric mapped to `_`). Per the design note in
/// spec.md §9, this lookup must happen *before* any backend lookup — it is
/// not merely a fast path, it is a documented short-circuit used for tests
/// and break-glass access.
pub fn env_override_name(service: &str, key: &str) -> String {
    let normalize = |value: &str| {
        value
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect::<String>()
    };
    format!("AQUAMAN_{}_{}", normalize(service), normalize(key))
}

/// Resolves a credential, consulting the environment override first and the
/// backend second. This is the ordering every call site must use; see
/// [`env_override_name`].
pub async fn resolve_credential(
    store: &dyn CredentialStore,
    service: &str,
    key: &str,
) -> Result<Option<String>, AquamanError> {
    let override_name = env_override_name(service, key);
    if let Ok(value) = std::env::var(&override_name) {
        if !value.is_empty() {
            return Ok(Some(value));
        }
    }
    store.get(service, key).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_name_normalizes_non_alphanumeric_characters() {
        assert_eq!(
            env_override_name("anthropic", "api_key"),
            "AQUAMAN_ANTHROPIC_API_KEY"
        );
        assert_eq!(
            env_override_name("my-service", "bot.token"),
            "AQUAMAN_MY_SERVICE_BOT_TOKEN"
        );
    }

    #[tokio::test]
    async fn resolve_credential_prefers_env_override_over_backend() {
        use crate::memory::MemoryStore;

        let store = MemoryStore::new();
        store.set("anthropic", "api_key", "from-backend").await.unwrap();
        let override_name = env_override_name("anthropic", "api_key");
        std::env::set_var(&override_name, "from-env");

        let resolved = resolve_credential(&store, "anthropic", "api_key")
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("from-env"));

        std::env::remove_var(&override_name);
        let resolved = resolve_credential(&store, "anthropic", "api_key")
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("from-backend"));
    }
}
