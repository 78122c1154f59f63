//! Self-signed TLS for the loopback TCP listener.
//!
//! Certificates here are not a security boundary — the proxy only ever
//! terminates on `127.0.0.1`, and a MITM on loopback implies the attacker
//! already has code execution on the host. TLS exists solely so that
//! clients refusing plain HTTP (some SDKs hardcode `https://`) still work.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use aquaman_core::error::AquamanError;

const CERT_FILE_NAME: &str = "cert.pem";
const KEY_FILE_NAME: &str = "key.pem";
const CERTIFICATE_VALIDITY_DAYS: i64 = 365;
const RENEW_WITHIN_DAYS: i64 = 30;

/// Paths to the two PEM files under `<config_dir>/tls/`.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Ensures a valid self-signed cert/key pair exists at `tls_dir`, generating
/// one if absent or within `RENEW_WITHIN_DAYS` of expiry. Returns the paths
/// either way.
pub fn ensure_certificate(tls_dir: &Path) -> Result<TlsMaterial, AquamanError> {
    std::fs::create_dir_all(tls_dir)
        .map_err(|err| AquamanError::io(format!("failed to create {}", tls_dir.display()), err))?;

    let cert_path = tls_dir.join(CERT_FILE_NAME);
    let key_path = tls_dir.join(KEY_FILE_NAME);

    let needs_generation = match read_not_after_unix(&cert_path) {
        Some(not_after) => {
            let renew_threshold = not_after.saturating_sub((RENEW_WITHIN_DAYS * 86_400) as u64);
            current_unix_timestamp() >= renew_threshold
        }
        None => true,
    };

    if needs_generation {
        tracing::info!(path = %cert_path.display(), "generating self-signed TLS certificate");
        generate_and_write(&cert_path, &key_path)?;
    }

    Ok(TlsMaterial { cert_path, key_path })
}

fn generate_and_write(cert_path: &Path, key_path: &Path) -> Result<(), AquamanError> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

    let not_before = time::OffsetDateTime::now_utc();
    let not_after = not_before + time::Duration::days(CERTIFICATE_VALIDITY_DAYS);
    let mut params = CertificateParams::new(vec!["127.0.0.1".to_string(), "localhost".to_string()])
        .map_err(|err| AquamanError::bad_input(format!("failed to build certificate params: {err}")))?;
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, "127.0.0.1");
    params.distinguished_name = distinguished_name;
    params.subject_alt_names = vec![
        SanType::IpAddress("127.0.0.1".parse().unwrap()),
        SanType::DnsName("localhost".try_into().unwrap()),
    ];
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = KeyPair::generate()
        .map_err(|err| AquamanError::bad_input(format!("failed to generate signing key: {err}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|err| AquamanError::bad_input(format!("failed to generate self-signed certificate: {err}")))?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    aquaman_core::write_text_atomic(cert_path, &cert_pem)?;
    aquaman_core::write_text_atomic(key_path, &key_pem)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(key_path, permissions)
            .map_err(|err| AquamanError::io(format!("failed to chmod {}", key_path.display()), err))?;
    }

    Ok(())
}

/// Parses `notAfter` out of a PEM certificate's DER without pulling in a
/// full ASN.1 parser: `x509-parser` reads the fixed-width ASN.1 UTCTime/
/// GeneralizedTime field directly. Returns `None` if the file is absent or
/// unparseable, which forces regeneration rather than risking proxy startup
/// on an expired or corrupt certificate.
fn read_not_after_unix(cert_path: &Path) -> Option<u64> {
    let pem_text = std::fs::read_to_string(cert_path).ok()?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem_text.as_bytes()).ok()?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents).ok()?;
    let not_after = cert.validity().not_after.timestamp();
    u64::try_from(not_after).ok()
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_certificate_creates_both_files() {
        let temp = tempfile::tempdir().unwrap();
        let tls_dir = temp.path().join("tls");
        let material = ensure_certificate(&tls_dir).unwrap();
        assert!(material.cert_path.exists());
        assert!(material.key_path.exists());
        let cert_pem = std::fs::read_to_string(&material.cert_path).unwrap();
        assert!(cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn ensure_certificate_is_idempotent_when_cert_is_fresh() {
        let temp = tempfile::tempdir().unwrap();
        let tls_dir = temp.path().join("tls");
        ensure_certificate(&tls_dir).unwrap();
        let first_cert = std::fs::read_to_string(tls_dir.join(CERT_FILE_NAME)).unwrap();
        ensure_certificate(&tls_dir).unwrap();
        let second_cert = std::fs::read_to_string(tls_dir.join(CERT_FILE_NAME)).unwrap();
        assert_eq!(first_cert, second_cert);
    }

    #[test]
    fn ensure_certificate_regenerates_when_existing_file_is_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let tls_dir = temp.path().join("tls");
        std::fs::create_dir_all(&tls_dir).unwrap();
        std::fs::write(tls_dir.join(CERT_FILE_NAME), "not a certificate").unwrap();
        std::fs::write(tls_dir.join(KEY_FILE_NAME), "not a key").unwrap();

        let material = ensure_certificate(&tls_dir).unwrap();
        let cert_pem = std::fs::read_to_string(&material.cert_path).unwrap();
        assert!(cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }
}
