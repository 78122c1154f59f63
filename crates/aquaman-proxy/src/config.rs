use std::path::PathBuf;

use serde::Deserialize;

use aquaman_core::error::AquamanError;

/// The `proxy:` section of the on-disk config, mirrored 1:1 from §6.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub socket_path: Option<PathBuf>,
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: TlsConfig,
    pub allowed_services: Vec<String>,
    pub hostmap_token: Option<String>,
    /// Total request timeout; `None` means no deadline, since streaming
    /// completions can run long.
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub auto_generate: bool,
}

fn default_true() -> bool {
    true
}

/// How the proxy should listen: exactly one of UDS or TCP, never both.
pub enum ListenMode {
    UnixSocket(PathBuf),
    Tcp { port: u16, tls: TlsConfig },
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), AquamanError> {
        if self.allowed_services.is_empty() {
            return Err(AquamanError::bad_input("allowed_services must be non-empty"));
        }
        match (&self.socket_path, self.port) {
            (Some(_), Some(_)) => Err(AquamanError::bad_input(
                "socket_path and port are mutually exclusive",
            )),
            (None, None) => Err(AquamanError::bad_input(
                "one of socket_path or port must be set",
            )),
            _ => Ok(()),
        }
    }

    pub fn listen_mode(&self) -> Result<ListenMode, AquamanError> {
        self.validate()?;
        if let Some(path) = &self.socket_path {
            return Ok(ListenMode::UnixSocket(path.clone()));
        }
        let port = self.port.expect("validate() guarantees port is set when socket_path is not");
        Ok(ListenMode::Tcp { port, tls: self.tls.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ProxyConfig {
        ProxyConfig {
            socket_path: None,
            port: Some(8089),
            tls: TlsConfig::default(),
            allowed_services: vec!["anthropic".to_string()],
            hostmap_token: None,
            request_timeout_ms: None,
        }
    }

    #[test]
    fn validate_rejects_empty_allowlist() {
        let mut config = base_config();
        config.allowed_services.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_both_socket_and_port() {
        let mut config = base_config();
        config.socket_path = Some(PathBuf::from("/tmp/aquaman.sock"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_neither_socket_nor_port() {
        let mut config = base_config();
        config.port = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn listen_mode_prefers_socket_path_when_set() {
        let mut config = base_config();
        config.port = None;
        config.socket_path = Some(PathBuf::from("/tmp/aquaman.sock"));
        assert!(matches!(config.listen_mode().unwrap(), ListenMode::UnixSocket(_)));
    }
}
