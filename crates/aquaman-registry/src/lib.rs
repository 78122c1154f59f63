use std::collections::BTreeMap;
use std::sync::RwLock;

use aquaman_core::error::AquamanError;
use serde::{Deserialize, Serialize};

/// Everything the proxy needs to know about one third-party API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub upstream: String,
    pub auth_header: String,
    pub auth_prefix: String,
    pub credential_key: String,
}

/// Shallow-merge overlay: only the fields that are `Some` replace the base
/// descriptor's fields, mirroring `override(name, partial)` from the spec.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceDescriptorPatch {
    pub upstream: Option<String>,
    pub auth_header: Option<String>,
    pub auth_prefix: Option<String>,
    pub credential_key: Option<String>,
}

fn lowercase(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn default_entries() -> Vec<(&'static str, ServiceDescriptor)> {
    vec![
        (
            "anthropic",
            ServiceDescriptor {
                upstream: "https://api.anthropic.com".to_string(),
                auth_header: "x-api-key".to_string(),
                auth_prefix: String::new(),
                credential_key: "api_key".to_string(),
            },
        ),
        (
            "openai",
            ServiceDescriptor {
                upstream: "https://api.openai.com".to_string(),
                auth_header: "Authorization".to_string(),
                auth_prefix: "Bearer ".to_string(),
                credential_key: "api_key".to_string(),
            },
        ),
        (
            "github",
            ServiceDescriptor {
                upstream: "https://api.github.com".to_string(),
                auth_header: "Authorization".to_string(),
                auth_prefix: "Bearer ".to_string(),
                credential_key: "token".to_string(),
            },
        ),
        (
            "slack",
            ServiceDescriptor {
                upstream: "https://slack.com/api".to_string(),
                auth_header: "Authorization".to_string(),
                auth_prefix: "Bearer ".to_string(),
                credential_key: "bot_token".to_string(),
            },
        ),
        (
            "discord",
            ServiceDescriptor {
                upstream: "https://discord.com/api".to_string(),
                auth_header: "Authorization".to_string(),
                auth_prefix: "Bot ".to_string(),
                credential_key: "bot_token".to_string(),
            },
        ),
    ]
}

/// Service table: static defaults plus caller `register`/`override` calls.
/// Lookups are case-insensitive on the first path segment; names are
/// lowercased on insert so the table itself never stores mixed case.
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, ServiceDescriptor>>,
}

impl ServiceRegistry {
    /// A registry preloaded with the five built-in services.
    pub fn with_defaults() -> Self {
        let services = default_entries()
            .into_iter()
            .map(|(name, descriptor)| (name.to_string(), descriptor))
            .collect();
        Self { services: RwLock::new(services) }
    }

    pub fn empty() -> Self {
        Self { services: RwLock::new(BTreeMap::new()) }
    }

    pub fn register(&self, name: &str, descriptor: ServiceDescriptor) {
        self.services
            .write()
            .expect("registry lock poisoned")
            .insert(lowercase(name), descriptor);
    }

    /// Shallow-merges `patch` onto the existing descriptor for `name`.
    /// Registering an override for a name that doesn't exist yet is an
    /// error — overrides amend a known service, they don't create one.
    pub fn apply_override(&self, name: &str, patch: ServiceDescriptorPatch) -> Result<(), AquamanError> {
        let key = lowercase(name);
        let mut services = self.services.write().expect("registry lock poisoned");
        let descriptor = services
            .get_mut(&key)
            .ok_or_else(|| AquamanError::UnknownService(key.clone()))?;
        if let Some(upstream) = patch.upstream {
            descriptor.upstream = upstream;
        }
        if let Some(auth_header) = patch.auth_header {
            descriptor.auth_header = auth_header;
        }
        if let Some(auth_prefix) = patch.auth_prefix {
            descriptor.auth_prefix = auth_prefix;
        }
        if let Some(credential_key) = patch.credential_key {
            descriptor.credential_key = credential_key;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ServiceDescriptor> {
        self.services
            .read()
            .expect("registry lock poisoned")
            .get(&lowercase(name))
            .cloned()
    }

    pub fn all(&self) -> Vec<(String, ServiceDescriptor)> {
        self.services
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
            .collect()
    }

    /// Every `auth_header` value registered across all services, used by
    /// the proxy to strip cross-service auth headers before forwarding.
    pub fn all_auth_headers(&self) -> Vec<String> {
        self.services
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|descriptor| descriptor.auth_header.clone())
            .collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bit_exact_table() {
        let registry = ServiceRegistry::with_defaults();
        let anthropic = registry.get("anthropic").unwrap();
        assert_eq!(anthropic.upstream, "https://api.anthropic.com");
        assert_eq!(anthropic.auth_header, "x-api-key");
        assert_eq!(anthropic.auth_prefix, "");
        assert_eq!(anthropic.credential_key, "api_key");

        let openai = registry.get("openai").unwrap();
        assert_eq!(openai.auth_header, "Authorization");
        assert_eq!(openai.auth_prefix, "Bearer ");
        assert_eq!(openai.credential_key, "api_key");

        let github = registry.get("github").unwrap();
        assert_eq!(github.credential_key, "token");

        let slack = registry.get("slack").unwrap();
        assert_eq!(slack.credential_key, "bot_token");
        assert_eq!(slack.auth_prefix, "Bearer ");

        let discord = registry.get("discord").unwrap();
        assert_eq!(discord.auth_prefix, "Bot ");
        assert_eq!(discord.credential_key, "bot_token");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ServiceRegistry::with_defaults();
        assert!(registry.get("Anthropic").is_some());
        assert!(registry.get("ANTHROPIC").is_some());
    }

    #[test]
    fn register_lowercases_name_on_insert() {
        let registry = ServiceRegistry::empty();
        registry.register(
            "MyService",
            ServiceDescriptor {
                upstream: "https://example.com".to_string(),
                auth_header: "Authorization".to_string(),
                auth_prefix: "Bearer ".to_string(),
                credential_key: "api_key".to_string(),
            },
        );
        assert!(registry.get("myservice").is_some());
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.all()[0].0, "myservice");
    }

    #[test]
    fn apply_override_shallow_merges_only_provided_fields() {
        let registry = ServiceRegistry::with_defaults();
        registry
            .apply_override(
                "anthropic",
                ServiceDescriptorPatch {
                    upstream: Some("https://staging.anthropic.internal".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let descriptor = registry.get("anthropic").unwrap();
        assert_eq!(descriptor.upstream, "https://staging.anthropic.internal");
        assert_eq!(descriptor.auth_header, "x-api-key");
    }

    #[test]
    fn apply_override_on_unknown_service_fails() {
        let registry = ServiceRegistry::with_defaults();
        let err = registry
            .apply_override("not-a-service", ServiceDescriptorPatch::default())
            .unwrap_err();
        assert!(matches!(err, AquamanError::UnknownService(_)));
    }

    #[test]
    fn all_auth_headers_covers_every_registered_service() {
        let registry = ServiceRegistry::with_defaults();
        let mut headers = registry.all_auth_headers();
        headers.sort();
        headers.dedup();
        assert_eq!(headers, vec!["Authorization".to_string(), "x-api-key".to_string()]);
    }
}
