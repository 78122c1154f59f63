use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;

use aquaman_audit::AuditLog;
use aquaman_core::error::AquamanError;
use aquaman_registry::ServiceRegistry;
use aquaman_secret::CredentialStore;

use crate::config::{ListenMode, ProxyConfig, TlsConfig};
use crate::handlers;
use crate::state::ProxyState;

const GRACEFUL_SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Owns the listener and the shared state for one proxy instance. `serve`
/// runs until `stop()` is called or the listener errors out.
pub struct Proxy {
    config: ProxyConfig,
    state: Arc<ProxyState>,
    shutdown: Arc<Notify>,
}

impl Proxy {
    pub fn new(
        config: ProxyConfig,
        registry: Arc<ServiceRegistry>,
        credentials: Arc<dyn CredentialStore>,
        audit: Arc<AuditLog>,
    ) -> Result<Self, AquamanError> {
        config.validate()?;
        let state = Arc::new(ProxyState::new(&config, registry, credentials, audit)?);
        Ok(Self { config, state, shutdown: Arc::new(Notify::new()) })
    }

    /// Signals the listener to stop accepting new connections. A no-op if
    /// the proxy isn't currently serving.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    pub async fn serve(&self) -> Result<(), AquamanError> {
        match self.config.listen_mode()? {
            ListenMode::UnixSocket(path) => self.serve_uds(&path).await,
            ListenMode::Tcp { port, tls } => {
                if tls.enabled {
                    self.serve_tcp_tls(port, &tls).await
                } else {
                    self.serve_tcp(port).await
                }
            }
        }
    }

    async fn serve_tcp(&self, port: u16) -> Result<(), AquamanError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| AquamanError::io(format!("failed to bind {addr}"), err))?;
        tracing::info!(%addr, "aquaman proxy listening (tcp)");
        self.run_with_graceful_shutdown(listener, self.router()).await
    }

    async fn serve_tcp_tls(&self, port: u16, tls: &TlsConfig) -> Result<(), AquamanError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|err| AquamanError::io(format!("failed to bind {addr}"), err))?;

        let (cert_path, key_path) = self.resolve_tls_paths(tls)?;
        let acceptor = build_tls_acceptor(&cert_path, &key_path)?;
        let listener = TlsListener { inner: tcp_listener, acceptor };
        tracing::info!(%addr, "aquaman proxy listening (tcp+tls)");
        self.run_with_graceful_shutdown(listener, self.router()).await
    }

    async fn serve_uds(&self, path: &Path) -> Result<(), AquamanError> {
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|err| AquamanError::io(format!("failed to remove stale socket {}", path.display()), err))?;
        }
        let listener = UnixListener::bind(path)
            .map_err(|err| AquamanError::io(format!("failed to bind {}", path.display()), err))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|err| AquamanError::io(format!("failed to chmod {}", path.display()), err))?;
        }

        tracing::info!(path = %path.display(), "aquaman proxy listening (unix socket)");
        let result = self.run_with_graceful_shutdown(listener, self.router()).await;
        let _ = std::fs::remove_file(path);
        result
    }

    fn resolve_tls_paths(&self, tls: &TlsConfig) -> Result<(PathBuf, PathBuf), AquamanError> {
        if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
            return Ok((cert.clone(), key.clone()));
        }
        if !tls.auto_generate {
            return Err(AquamanError::bad_input(
                "tls.enabled is set but no cert_path/key_path were given and auto_generate is false",
            ));
        }
        Err(AquamanError::bad_input(
            "tls.cert_path/key_path must be resolved by the caller via aquaman_tls::ensure_certificate before Proxy::new",
        ))
    }

    async fn run_with_graceful_shutdown<L>(&self, listener: L, app: Router) -> Result<(), AquamanError>
    where
        L: axum::serve::Listener,
    {
        let shutdown = Arc::clone(&self.shutdown);
        let serve_future = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown.notified().await;
        });

        match tokio::time::timeout(GRACEFUL_SHUTDOWN_BUDGET, serve_future).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AquamanError::io("proxy listener exited with an error", err)),
            Err(_) => {
                tracing::warn!("graceful shutdown exceeded 30s budget, aborting in-flight requests");
                Ok(())
            }
        }
    }
}

/// Builds the router for a given shared state. Exposed standalone (not just
/// through [`Proxy::serve`]) so integration tests can drive requests through
/// the full header/forwarding pipeline with `tower::ServiceExt::oneshot`
/// without binding a real listener.
pub fn build_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/_health", get(handlers::health))
        .route("/_hostmap", get(handlers::hostmap))
        .fallback(handlers::forward)
        .with_state(state)
}

/// Wraps a `TcpListener` so every accepted connection completes its TLS
/// handshake before axum's `serve` loop sees it. A handshake failure (or a
/// transient `accept` error) is logged and the loop keeps going — one bad
/// client must not take the listener down.
struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl axum::serve::Listener for TlsListener {
    type Io = tokio_rustls::server::TlsStream<tokio::net::TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(error = %err, "tcp accept failed");
                    continue;
                }
            };
            match self.acceptor.accept(stream).await {
                Ok(tls_stream) => return (tls_stream, addr),
                Err(err) => {
                    tracing::warn!(error = %err, "tls handshake failed");
                    continue;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

fn build_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, AquamanError> {
    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer};

    let cert_chain: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(cert_path)
        .map_err(|err| AquamanError::bad_input(format!("failed to read {}: {err}", cert_path.display())))?
        .collect::<Result<_, _>>()
        .map_err(|err| AquamanError::bad_input(format!("failed to parse {}: {err}", cert_path.display())))?;
    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|err| AquamanError::bad_input(format!("failed to read {}: {err}", key_path.display())))?;

    let server_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|err| AquamanError::bad_input(format!("invalid TLS certificate/key pair: {err}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
