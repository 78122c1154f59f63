use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::{json, Value};

use aquaman_core::error::AquamanError;

use crate::store::CredentialStore;

const DEFAULT_VAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub address: String,
    pub token: String,
    pub namespace: Option<String>,
    /// KV v2 mount point, e.g. `secret` for the default `secret/` engine.
    pub mount: String,
    pub request_timeout_ms: u64,
}

/// Credential backend over a HashiCorp Vault KV v2 secret engine. Every
/// `(service, key)` pair lives at `<mount>/data/<service>`, field `<key>`,
/// so a single Vault read covers every key for a service.
pub struct VaultStore {
    client: reqwest::Client,
    config: VaultConfig,
}

impl VaultStore {
    pub fn new(config: VaultConfig) -> Result<Self, AquamanError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Vault-Token",
            HeaderValue::from_str(config.token.trim())
                .map_err(|err| AquamanError::bad_input(format!("invalid vault token: {err}")))?,
        );
        if let Some(namespace) = &config.namespace {
            headers.insert(
                "X-Vault-Namespace",
                HeaderValue::from_str(namespace)
                    .map_err(|err| AquamanError::bad_input(format!("invalid vault namespace: {err}")))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|err| AquamanError::BackendTransient(format!("failed to build vault client: {err}")))?;

        Ok(Self { client, config })
    }

    fn data_url(&self, service: &str) -> String {
        let base = self.config.address.trim_end_matches('/');
        format!("{base}/v1/{}/data/{service}", self.config.mount)
    }

    fn metadata_url(&self) -> String {
        let base = self.config.address.trim_end_matches('/');
        format!("{base}/v1/{}/metadata", self.config.mount)
    }

    async fn read_fields(&self, service: &str) -> Result<Option<serde_json::Map<String, Value>>, AquamanError> {
        let response = self
            .client
            .get(self.data_url(service))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await.map_err(map_reqwest_error)?;
                let fields = body
                    .get("data")
                    .and_then(|d| d.get("data"))
                    .and_then(|d| d.as_object())
                    .cloned()
                    .unwrap_or_default();
                Ok(Some(fields))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::FORBIDDEN => Err(AquamanError::BackendPermissionDenied(format!(
                "vault denied read access to {service}"
            ))),
            status if status.is_server_error() => {
                tracing::warn!(%status, %service, "vault returned a server error, caller may retry");
                Err(AquamanError::BackendTransient(format!(
                    "vault returned {status} reading {service}"
                )))
            }
            status => Err(AquamanError::BackendTransient(format!(
                "unexpected vault status {status} reading {service}"
            ))),
        }
    }

    async fn write_fields(&self, service: &str, fields: &serde_json::Map<String, Value>) -> Result<(), AquamanError> {
        let response = self
            .client
            .post(self.data_url(service))
            .json(&json!({ "data": fields }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::FORBIDDEN => Err(AquamanError::BackendPermissionDenied(format!(
                "vault denied write access to {service}"
            ))),
            status if status.is_server_error() => Err(AquamanError::BackendTransient(format!(
                "vault returned {status} writing {service}"
            ))),
            status => Err(AquamanError::BackendTransient(format!(
                "unexpected vault status {status} writing {service}"
            ))),
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> AquamanError {
    if err.is_timeout() {
        AquamanError::BackendTransient(format!("vault request timed out: {err}"))
    } else {
        AquamanError::BackendTransient(format!("vault request failed: {err}"))
    }
}

#[async_trait]
impl CredentialStore for VaultStore {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, AquamanError> {
        let fields = self.read_fields(service).await?;
        Ok(fields
            .and_then(|map| map.get(key).and_then(|v| v.as_str()).map(str::to_string)))
    }

    async fn set(&self, service: &str, key: &str, value: &str) -> Result<(), AquamanError> {
        let mut fields = self.read_fields(service).await?.unwrap_or_default();
        fields.insert(key.to_string(), Value::String(value.to_string()));
        self.write_fields(service, &fields).await
    }

    async fn delete(&self, service: &str, key: &str) -> Result<bool, AquamanError> {
        let Some(mut fields) = self.read_fields(service).await? else {
            return Ok(false);
        };
        let removed = fields.remove(key).is_some();
        if removed {
            self.write_fields(service, &fields).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<(String, String)>, AquamanError> {
        let response = self
            .client
            .request(reqwest::Method::from_bytes(b"LIST").expect("LIST is a valid HTTP token"), self.metadata_url())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let services: Vec<String> = match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await.map_err(map_reqwest_error)?;
                body.get("data")
                    .and_then(|d| d.get("keys"))
                    .and_then(|k| k.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default()
            }
            StatusCode::NOT_FOUND => Vec::new(),
            status => {
                return Err(AquamanError::BackendTransient(format!(
                    "unexpected vault status {status} listing mount"
                )))
            }
        };

        let mut pairs = Vec::new();
        for service in services {
            let service = service.trim_end_matches('/').to_string();
            if let Some(fields) = self.read_fields(&service).await? {
                for key in fields.keys() {
                    pairs.push((service.clone(), key.clone()));
                }
            }
        }
        Ok(pairs)
    }
}
