//! Symmetric key material.

use crate::error::{CryptoError, CryptoResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Input key material for the static fallback key.
///
/// Anyone with this source can derive the fallback key, so data sealed under
/// it is only obfuscated. [`crate::KeySource::Fallback`] reports when it is
/// in use.
const FALLBACK_IKM: &[u8] = b"harbor-static-fallback-key";
const FALLBACK_INFO: &[u8] = b"harbor-fallback-v1";
const PASSWORD_INFO: &[u8] = b"harbor-encryption-key-v1";

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Parses a key previously produced by [`to_base64`](Self::to_base64).
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not base64 or has the wrong length.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::encoding(e.to_string()))?;
        let key = Self::from_bytes(&decoded);
        decoded.zeroize();
        key
    }

    /// Encodes the key as base64 for persistence.
    ///
    /// # Security
    ///
    /// The result is the raw key. Store it only in a key store.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a password using HKDF-SHA256.
    ///
    /// HKDF is appropriate when the input already has high entropy (e.g. a
    /// generated passphrase). For user-chosen PINs and passwords use
    /// [`crate::hash_credential`] for verification instead.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> CryptoResult<Self> {
        Self::hkdf(password, Some(salt), PASSWORD_INFO)
    }

    /// Returns the static fallback key.
    ///
    /// Used only when the persisted key cannot be loaded or stored.
    pub fn fallback() -> CryptoResult<Self> {
        Self::hkdf(FALLBACK_IKM, None, FALLBACK_INFO)
    }

    fn hkdf(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> CryptoResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(salt, ikm);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(info, &mut bytes)
            .map_err(|_| CryptoError::key_derivation_failed("HKDF expand failed"))?;

        Ok(Self { bytes })
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for EncryptionKey {}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn key_from_bytes() {
        let bytes = [42u8; KEY_SIZE];
        let key = EncryptionKey::from_bytes(&bytes).unwrap();
        assert_eq!(key.as_bytes(), &bytes);
    }

    #[test]
    fn key_wrong_size() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 64]).is_err());
    }

    #[test]
    fn base64_roundtrip() {
        let key = EncryptionKey::generate();
        let restored = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, restored);
    }

    #[test]
    fn base64_rejects_garbage() {
        assert!(EncryptionKey::from_base64("not base64!!").is_err());
        assert!(EncryptionKey::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn fallback_key_is_stable() {
        let a = EncryptionKey::fallback().unwrap();
        let b = EncryptionKey::fallback().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_from_password() {
        let key1 = EncryptionKey::derive_from_password(b"pw", b"salt").unwrap();
        let key2 = EncryptionKey::derive_from_password(b"pw", b"salt").unwrap();
        assert_eq!(key1, key2);

        let key3 = EncryptionKey::derive_from_password(b"pw", b"other").unwrap();
        assert_ne!(key1, key3);
    }

    #[test]
    fn debug_redacts_bytes() {
        let key = EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains('7'));
    }
}
