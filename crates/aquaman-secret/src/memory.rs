use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use aquaman_core::error::AquamanError;

use crate::store::CredentialStore;

/// In-process credential store, for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        let entries = self.entries.lock().expect("memory store lock poisoned");
        Ok(entries.get(&(service.to_string(), key.to_string())).cloned())
    }

    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError> {
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        entries.insert((service.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError> {
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        Ok(entries.remove(&(service.to_string(), key.to_string())).is_some())
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let entries = self.entries.lock().expect("memory store lock poisoned");
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("anthropic", "api_key", "sk-ant-123").await.unwrap();
        assert_eq!(
            store.get("anthropic", "api_key").await.unwrap().as_deref(),
            Some("sk-ant-123")
        );
    }

    #[tokio::test]
    async fn get_missing_entry_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("anthropic", "api_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_whether_entry_existed() {
        let store = MemoryStore::new();
        store.set("github", "token", "ghp_abc").await.unwrap();
        assert!(store.delete("github", "token").await.unwrap());
        assert!(!store.delete("github", "token").await.unwrap());
        assert_eq!(store.get("github", "token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_enumerates_all_service_key_pairs() {
        let store = MemoryStore::new();
        store.set("anthropic", "api_key", "a").await.unwrap();
        store.set("github", "token", "b").await.unwrap();
        let mut entries = store.list().await.unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("anthropic".to_string(), "api_key".to_string()),
                ("github".to_string(), "token".to_string()),
            ]
        );
    }
}
