mod cli_args;
mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use aquaman_audit::AuditLog;
use aquaman_registry::ServiceRegistry;
use aquaman_tls::ensure_certificate;

use cli_args::{Cli, Command};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "aquaman exited with an error");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Serve { config: config_path } => serve(&config_path).await,
        Command::Verify { log_dir } => verify(&log_dir),
    }
}

async fn serve(config_path: &std::path::Path) -> Result<ExitCode> {
    let loaded = config::load(config_path)?;

    loaded.proxy.validate().context("invalid proxy configuration")?;

    let mut proxy_config = loaded.proxy;
    if proxy_config.tls.enabled && proxy_config.tls.cert_path.is_none() && proxy_config.tls.auto_generate {
        let config_dir = config_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let tls_dir = config_dir.join("tls");
        let material = ensure_certificate(&tls_dir).context("failed to provision self-signed TLS certificate")?;
        proxy_config.tls.cert_path = Some(material.cert_path);
        proxy_config.tls.key_path = Some(material.key_path);
    }

    let backend_config = loaded
        .credentials
        .into_backend_config()
        .context("failed to resolve credential backend configuration")?;
    let credentials = aquaman_secret::build_store(backend_config).context("failed to start credential backend")?;

    let registry = Arc::new(ServiceRegistry::with_defaults());

    let audit = Arc::new(
        AuditLog::open_with_policy(loaded.audit.log_dir.clone(), loaded.audit.rotate_bytes, loaded.audit.rotate_age_s)
            .context("failed to open audit log")?,
    );

    let proxy = aquaman_proxy::Proxy::new(proxy_config, registry, credentials, audit)
        .context("failed to construct proxy")?;

    let proxy = Arc::new(proxy);
    let shutdown_proxy = Arc::clone(&proxy);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            shutdown_proxy.stop();
        }
    });

    proxy.serve().await.context("proxy exited with an error")?;
    Ok(ExitCode::SUCCESS)
}

fn verify(log_dir: &std::path::Path) -> Result<ExitCode> {
    let log = AuditLog::open(log_dir.to_path_buf()).context("failed to open audit log")?;
    let report = log.verify().context("failed to walk audit log")?;
    println!(
        "{{\"ok\":{},\"entry_count\":{},\"first_break_at\":{}}}",
        report.ok,
        report.entry_count,
        report
            .first_break_at
            .map(|index| index.to_string())
            .unwrap_or_else(|| "null".to_string())
    );
    if report.ok {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(4))
    }
}
