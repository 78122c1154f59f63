//! Cryptographic primitives used as wire-format building blocks.
//!
//! Every constant here (hash algorithm, PBKDF2 iteration count, AEAD scheme,
//! blob layout) is part of the on-disk/on-wire format. Changing any of them
//! breaks existing audit logs and encrypted-file vaults; do not "improve"
//! them without a migration.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::pkcs8::spki::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AquamanError;

/// PBKDF2-SHA256 iteration count. Part of the encrypted-file wire format.
pub const PBKDF2_ITERATIONS: u32 = 600_000;
const PBKDF2_KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;

/// SHA-256 of `bytes`, lowercase hex.
pub fn compute_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `SHA256(previous_hash_hex ‖ data)`, lowercase hex.
pub fn compute_chained_hash(data: &[u8], previous_hash_hex: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash_hex.as_bytes());
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// An RFC 4122 v4 UUID string.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 16 random bytes, hex-encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// An Ed25519 signing keypair, PEM-encoded (SPKI public, PKCS#8 private).
pub struct SigningKeypair {
    pub public_pem: String,
    pub private_pem: String,
}

/// Generates a fresh Ed25519 signing keypair.
pub fn generate_signing_keypair() -> Result<SigningKeypair, AquamanError> {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| AquamanError::bad_input(format!("failed to encode private key: {err}")))?
        .to_string();
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|err| AquamanError::bad_input(format!("failed to encode public key: {err}")))?;
    Ok(SigningKeypair {
        public_pem,
        private_pem,
    })
}

/// Signs `data` with a PKCS#8 PEM-encoded Ed25519 private key; returns a
/// base64-encoded signature.
pub fn sign(data: &[u8], private_pem: &str) -> Result<String, AquamanError> {
    let signing_key = SigningKey::from_pkcs8_pem(private_pem)
        .map_err(|err| AquamanError::bad_input(format!("invalid private key: {err}")))?;
    let signature = signing_key.sign(data);
    Ok(BASE64.encode(signature.to_bytes()))
}

/// Verifies a base64-encoded Ed25519 signature against an SPKI PEM public
/// key. Returns `false` (never an error) on any failure: a malformed key,
/// a malformed signature, or a genuine mismatch are all "not verified".
pub fn verify(data: &[u8], signature_b64: &str, public_pem: &str) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_public_key_pem(public_pem) else {
        return false;
    };
    let Ok(signature_bytes) = BASE64.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature_bytes): Result<[u8; 64], _> = signature_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key.verify(data, &signature).is_ok()
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; PBKDF2_KEY_LEN] {
    let mut key = [0u8; PBKDF2_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypts `plaintext` with a password-derived AES-256-GCM key.
///
/// Output is the five-field blob `salt:iv:auth_tag:ciphertext`, each field
/// base64-encoded, colon-separated. Salt and IV are fresh per call.
pub fn encrypt_with_password(plaintext: &[u8], password: &str) -> Result<String, AquamanError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let key_bytes = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(&iv);
    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| AquamanError::bad_input("encryption failed"))?;

    // aes-gcm appends the 16-byte auth tag to the ciphertext; split it back
    // out so the wire format carries it as its own field.
    let tag_start = sealed.len().saturating_sub(16);
    let (ciphertext, tag) = sealed.split_at(tag_start);

    Ok(format!(
        "{}:{}:{}:{}",
        BASE64.encode(salt),
        BASE64.encode(iv),
        BASE64.encode(tag),
        BASE64.encode(ciphertext),
    ))
}

/// Inverts [`encrypt_with_password`]. Fails with [`AquamanError::BadCiphertext`]
/// on a malformed blob, a wrong password, or a tampered field.
pub fn decrypt_with_password(blob: &str, password: &str) -> Result<Vec<u8>, AquamanError> {
    let fields: Vec<&str> = blob.splitn(4, ':').collect();
    let [salt_b64, iv_b64, tag_b64, ciphertext_b64] = fields.as_slice() else {
        return Err(AquamanError::BadCiphertext(
            "blob must have 4 colon-separated fields".to_string(),
        ));
    };

    let salt = BASE64
        .decode(salt_b64)
        .map_err(|_| AquamanError::BadCiphertext("invalid salt encoding".to_string()))?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|_| AquamanError::BadCiphertext("invalid iv encoding".to_string()))?;
    let tag = BASE64
        .decode(tag_b64)
        .map_err(|_| AquamanError::BadCiphertext("invalid tag encoding".to_string()))?;
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|_| AquamanError::BadCiphertext("invalid ciphertext encoding".to_string()))?;

    if iv.len() != IV_LEN || tag.len() != 16 {
        return Err(AquamanError::BadCiphertext(
            "iv or tag has unexpected length".to_string(),
        ));
    }

    let key_bytes = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(&iv);

    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);

    cipher
        .decrypt(nonce, sealed.as_slice())
        .map_err(|_| AquamanError::BadCiphertext("decryption failed: wrong password or tampered data".to_string()))
}

/// Requires length >= 12 and at least three of {lower, upper, digit, symbol}.
pub fn validate_password_strength(password: &str) -> bool {
    if password.len() < 12 {
        return false;
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace());
    [has_lower, has_upper, has_digit, has_symbol]
        .iter()
        .filter(|present| **present)
        .count()
        >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_hash_is_deterministic_sha256() {
        let hash = compute_hash(b"hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn compute_chained_hash_depends_on_previous_hash() {
        let zero = "0".repeat(64);
        let h1 = compute_chained_hash(b"entry-a", &zero);
        let h2 = compute_chained_hash(b"entry-a", "not-the-same-prefix");
        assert_ne!(h1, h2);
    }

    #[test]
    fn generate_id_produces_distinct_uuid_v4_strings() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn generate_nonce_is_32_hex_chars() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = generate_signing_keypair().expect("keypair");
        let signature = sign(b"payload", &keypair.private_pem).expect("sign");
        assert!(verify(b"payload", &signature, &keypair.public_pem));
    }

    #[test]
    fn verify_returns_false_not_error_on_tampered_payload() {
        let keypair = generate_signing_keypair().expect("keypair");
        let signature = sign(b"payload", &keypair.private_pem).expect("sign");
        assert!(!verify(b"different payload", &signature, &keypair.public_pem));
    }

    #[test]
    fn verify_returns_false_on_garbage_signature() {
        let keypair = generate_signing_keypair().expect("keypair");
        assert!(!verify(b"payload", "not-base64!!", &keypair.public_pem));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let blob = encrypt_with_password(b"top secret", "correct horse battery staple!").unwrap();
        let plaintext = decrypt_with_password(&blob, "correct horse battery staple!").unwrap();
        assert_eq!(plaintext, b"top secret");
    }

    #[test]
    fn decrypt_with_wrong_password_fails_closed() {
        let blob = encrypt_with_password(b"top secret", "correct horse battery staple!").unwrap();
        let err = decrypt_with_password(&blob, "wrong password entirely!!").unwrap_err();
        assert!(matches!(err, AquamanError::BadCiphertext(_)));
    }

    #[test]
    fn decrypt_with_malformed_blob_fails_closed() {
        let err = decrypt_with_password("not-a-valid-blob", "whatever password").unwrap_err();
        assert!(matches!(err, AquamanError::BadCiphertext(_)));
    }

    #[test]
    fn validate_password_strength_enforces_length_and_class_count() {
        assert!(!validate_password_strength("short1!"));
        assert!(!validate_password_strength("alllowercase12"));
        assert!(validate_password_strength("GoodPassw0rd!"));
    }
}
