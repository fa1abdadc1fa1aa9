//! Content encryption using ChaCha20-Poly1305
//!
//! The encrypted format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//! giving a fixed 28-byte overhead over the plaintext. Random-key encryption
//! draws both key and nonce from the system RNG; convergent encryption
//! derives both from the plaintext, so equal plaintext always produces equal
//! key and equal ciphertext.

use std::ops::Deref;

use chacha20poly1305::Key;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;
/// Size of a ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Fixed ciphertext overhead: nonce prefix plus authentication tag
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

// Domain separation for convergent key/nonce derivation. Changing either
// string changes every convergent ciphertext ever produced.
const CONVERGENT_KEY_CONTEXT: &str = "skiff v1 convergent key";
const CONVERGENT_NONCE_CONTEXT: &str = "skiff v1 convergent nonce";

/// Ciphertext length for a plaintext of `n` bytes
pub const fn encrypted_size(n: usize) -> usize {
    n + ENCRYPTION_OVERHEAD
}

/// Plaintext length for a ciphertext of `n` bytes, or `None` if `n` is too
/// short to be a valid ciphertext
pub const fn plaintext_size(n: usize) -> Option<usize> {
    if n < ENCRYPTION_OVERHEAD {
        None
    } else {
        Some(n - ENCRYPTION_OVERHEAD)
    }
}

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid secret size, expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("ciphertext authentication failed")]
    Authentication,
}

/// A 256-bit symmetric content encryption key
///
/// Each encrypted item (chunk or node) is sealed with its own `Secret`.
/// Random secrets come from [`Secret::generate`]; convergent secrets are
/// derived from the plaintext via [`Secret::convergent`], which preserves
/// content-based deduplication under encryption.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Secret([u8; SECRET_SIZE]);

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Self {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Derive the convergent secret for a plaintext
    ///
    /// Deterministic: equal plaintext always derives the equal secret, which
    /// is what lets two unrelated uploads of the same content land on the
    /// same ciphertext and the same store entry.
    pub fn convergent(plaintext: &[u8]) -> Self {
        Self(blake3::derive_key(CONVERGENT_KEY_CONTEXT, plaintext))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(SecretError::InvalidLength {
                expected: SECRET_SIZE,
                got: data.len(),
            });
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Parse a secret from a 64-character hex string
    pub fn from_hex(hex: &str) -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|_| SecretError::InvalidLength {
            expected: SECRET_SIZE * 2,
            got: hex.len(),
        })?;
        Ok(buff.into())
    }

    /// Render the secret as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn seal(&self, nonce_bytes: [u8; NONCE_SIZE], data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let key = Key::from_slice(self.bytes());
        let cipher = ChaCha20Poly1305::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, data)
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Encrypt data with a random nonce
    ///
    /// The output format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
    /// Two encryptions of the same plaintext produce different ciphertexts.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;
        self.seal(nonce_bytes, data)
    }

    /// Encrypt data with a nonce derived from the plaintext
    ///
    /// Must only be called on a secret derived via [`Secret::convergent`]
    /// from the same plaintext; key and nonce are then both functions of the
    /// content and the ciphertext is fully deterministic.
    pub fn encrypt_convergent(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let derived = blake3::derive_key(CONVERGENT_NONCE_CONTEXT, data);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&derived[..NONCE_SIZE]);
        self.seal(nonce_bytes, data)
    }

    /// Decrypt data
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Authentication`] if the input is truncated or
    /// the authentication tag does not verify (wrong key or tampered
    /// ciphertext). Never returns corrupted plaintext.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < ENCRYPTION_OVERHEAD {
            return Err(SecretError::Authentication);
        }

        let key = Key::from_slice(self.bytes());
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let cipher = ChaCha20Poly1305::new(key);
        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| SecretError::Authentication)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let secret = Secret::generate();
        let data = b"hello world, this is a test message for encryption";

        let encrypted = secret.encrypt(data).unwrap();
        assert_eq!(encrypted.len(), encrypted_size(data.len()));

        let decrypted = secret.decrypt(&encrypted).unwrap();
        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(encrypted_size(0), 28);
        assert_eq!(encrypted_size(100), 128);
        assert_eq!(plaintext_size(28), Some(0));
        assert_eq!(plaintext_size(128), Some(100));
        assert_eq!(plaintext_size(27), None);
    }

    #[test]
    fn test_random_nonce_divergence() {
        let secret = Secret::generate();
        let data = b"same plaintext";

        let a = secret.encrypt(data).unwrap();
        let b = secret.encrypt(data).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_convergent_determinism() {
        let data = b"convergent plaintext";
        let k1 = Secret::convergent(data);
        let k2 = Secret::convergent(data);
        assert_eq!(k1, k2);

        let c1 = k1.encrypt_convergent(data).unwrap();
        let c2 = k2.encrypt_convergent(data).unwrap();
        assert_eq!(c1, c2);

        let other = Secret::convergent(b"different plaintext");
        assert_ne!(k1, other);
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret = Secret::generate();
        let other = Secret::generate();
        let encrypted = secret.encrypt(b"sensitive").unwrap();

        let result = other.decrypt(&encrypted);
        assert!(matches!(result, Err(SecretError::Authentication)));
    }

    #[test]
    fn test_truncated_input_fails() {
        let secret = Secret::generate();
        let encrypted = secret.encrypt(b"short").unwrap();

        assert!(matches!(
            secret.decrypt(&encrypted[..10]),
            Err(SecretError::Authentication)
        ));
        assert!(matches!(
            secret.decrypt(&[]),
            Err(SecretError::Authentication)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let secret = Secret::generate();
        let mut encrypted = secret.encrypt(b"integrity matters").unwrap();
        encrypted[NONCE_SIZE + 3] ^= 0xFF;

        assert!(matches!(
            secret.decrypt(&encrypted),
            Err(SecretError::Authentication)
        ));
    }

    #[test]
    fn test_hex_round_trip() {
        let secret = Secret::generate();
        let hex = secret.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Secret::from_hex(&hex).unwrap(), secret);

        assert!(Secret::from_hex("abcd").is_err());
        assert!(Secret::from_hex(&"a".repeat(66)).is_err());
    }

    #[test]
    fn test_size_validation() {
        assert!(Secret::from_slice(&[1u8; 16]).is_err());
        assert!(Secret::from_slice(&[1u8; 64]).is_err());
        assert!(Secret::from_slice(&[1u8; SECRET_SIZE]).is_ok());
    }

    #[test]
    fn test_empty_data_encryption() {
        let secret = Secret::generate();
        let encrypted = secret.encrypt(b"").unwrap();
        assert_eq!(encrypted.len(), 28);

        let decrypted = secret.decrypt(&encrypted).unwrap();
        assert!(decrypted.is_empty());
    }
}
