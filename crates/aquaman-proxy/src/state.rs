use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use aquaman_audit::AuditLog;
use aquaman_core::error::AquamanError;
use aquaman_registry::ServiceRegistry;
use aquaman_secret::CredentialStore;

use crate::config::ProxyConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Shared, read-mostly state handed to every axum handler behind an `Arc`.
/// Built once in [`crate::server::Proxy::new`] and never mutated afterward —
/// matches §5's "service registry: built once at startup, then read-only"
/// and "HTTP client: shared across tasks, internally concurrent".
pub struct ProxyState {
    pub registry: Arc<ServiceRegistry>,
    pub credentials: Arc<dyn CredentialStore>,
    pub audit: Arc<AuditLog>,
    pub http_client: reqwest::Client,
    pub allowed_services: BTreeSet<String>,
    pub hostmap_token: Option<String>,
}

impl ProxyState {
    pub fn new(
        config: &ProxyConfig,
        registry: Arc<ServiceRegistry>,
        credentials: Arc<dyn CredentialStore>,
        audit: Arc<AuditLog>,
    ) -> Result<Self, AquamanError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(IDLE_TIMEOUT);
        if let Some(ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let http_client = builder
            .build()
            .map_err(|err| AquamanError::bad_input(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            registry,
            credentials,
            audit,
            http_client,
            allowed_services: config.allowed_services.iter().cloned().collect(),
            hostmap_token: config.hostmap_token.clone(),
        })
    }

    pub fn is_allowed(&self, service: &str) -> bool {
        self.allowed_services.contains(service)
    }
}
