use std::fmt;
use std::ops::Deref;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Size of an Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Public key identifying a peer on the relay network
///
/// A thin wrapper around an Ed25519 verifying key. The hex rendering of
/// this key is the first half of a peer id string and is how peers
/// recognize their own echoed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        // reject bytes that are not a valid curve point
        VerifyingKey::from_bytes(&buff)
            .map_err(|_| anyhow::anyhow!("public key invalid point"))?;
        Ok(PublicKey(buff))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over a message
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), KeyError> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|_| anyhow::anyhow!("public key invalid point"))?;
        key.verify(message, signature)
            .map_err(|_| anyhow::anyhow!("signature verification failed").into())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(PublicKey(buff))
    }
}

/// Secret key for a peer identity
///
/// Signs the relay events this peer publishes. Not used for content
/// encryption; content secrets live in [`super::Secret`].
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl Deref for SecretKey {
    type Target = SigningKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SecretKey {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut buff = [0; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        SecretKey(SigningKey::from_bytes(&buff))
    }

    pub fn from_bytes(bytes: &[u8; PRIVATE_KEY_SIZE]) -> Self {
        SecretKey(SigningKey::from_bytes(bytes))
    }

    /// The public half of this keypair
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.0.sign(message)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        write!(f, "SecretKey({})", self.public().to_hex())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let secret = SecretKey::generate();
        let public = secret.public();

        let sig = secret.sign(b"message");
        assert!(public.verify(b"message", &sig).is_ok());
        assert!(public.verify(b"other message", &sig).is_err());
    }

    #[test]
    fn test_public_hex_round_trip() {
        let public = SecretKey::generate().public();
        let hex = public.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(PublicKey::from_hex(&hex).unwrap(), public);
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(PublicKey::from_hex(&"g".repeat(64)).is_err());
    }
}
