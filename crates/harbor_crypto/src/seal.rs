//! Fail-open string sealing.

use crate::cipher::{AesGcmCipher, Cipher};
use crate::error::{CryptoError, CryptoResult};
use crate::key::EncryptionKey;
use crate::keystore::KeySource;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Structural marker that starts every sealed string.
pub const SEALED_PREFIX: &str = "hv1:";

/// Returns true if `input` carries the sealed-string marker.
#[must_use]
pub fn is_sealed(input: &str) -> bool {
    input.starts_with(SEALED_PREFIX)
}

/// Output of [`Crypto::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// The sealed string, or the original plaintext if sealing failed.
    pub text: String,
    /// False when `text` is the unencrypted fallback.
    pub encrypted: bool,
}

/// Snapshot of crypto health for host-side logging and alerting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoHealth {
    /// Where the active key came from.
    pub key_source: KeySource,
    /// Number of `seal` calls that stored plaintext.
    pub encrypt_fallbacks: u64,
    /// Number of sealed inputs that `open` could not decrypt.
    pub decrypt_fallbacks: u64,
    /// Reason for the most recent fallback.
    pub last_fallback: Option<String>,
}

impl CryptoHealth {
    /// Returns true if confidentiality is degraded in any way.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.key_source.is_weakened() || self.encrypt_fallbacks > 0 || self.decrypt_fallbacks > 0
    }
}

/// Fail-open sealing front end over a [`Cipher`].
///
/// Availability wins over confidentiality: `seal` and `open` never return an
/// error. Fallbacks are counted, logged with `tracing::warn!` and exposed
/// through [`health`](Self::health).
pub struct Crypto {
    cipher: Box<dyn Cipher>,
    key_source: KeySource,
    encrypt_fallbacks: AtomicU64,
    decrypt_fallbacks: AtomicU64,
    last_fallback: RwLock<Option<String>>,
}

impl Crypto {
    /// Creates an AES-256-GCM crypto front end.
    #[must_use]
    pub fn new(key: EncryptionKey, key_source: KeySource) -> Self {
        Self::with_cipher(AesGcmCipher::new(&key), key_source)
    }

    /// Creates a front end over an arbitrary cipher.
    pub fn with_cipher(cipher: impl Cipher + 'static, key_source: KeySource) -> Self {
        if key_source.is_weakened() {
            warn!("crypto initialised with the static fallback key");
        }
        Self {
            cipher: Box::new(cipher),
            key_source,
            encrypt_fallbacks: AtomicU64::new(0),
            decrypt_fallbacks: AtomicU64::new(0),
            last_fallback: RwLock::new(None),
        }
    }

    /// Seals `plaintext`, returning `hv1:<base64>`.
    ///
    /// # Errors
    ///
    /// Returns the cipher error unchanged.
    pub fn try_seal(&self, plaintext: &str) -> CryptoResult<String> {
        let blob = self.cipher.encrypt(plaintext.as_bytes())?;
        Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(blob)))
    }

    /// Opens a sealed string.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` is not sealed, is not valid base64,
    /// fails authentication or does not decrypt to UTF-8.
    pub fn try_open(&self, input: &str) -> CryptoResult<String> {
        let encoded = input
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| CryptoError::decryption_failed("missing sealed prefix"))?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::encoding(e.to_string()))?;
        let plaintext = self.cipher.decrypt(&blob)?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::encoding(e.to_string()))
    }

    /// Seals `plaintext`, falling back to the plaintext on failure.
    pub fn seal(&self, plaintext: &str) -> Sealed {
        match self.try_seal(plaintext) {
            Ok(text) => Sealed {
                text,
                encrypted: true,
            },
            Err(e) => {
                self.encrypt_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.note_fallback(format!("seal: {e}"));
                warn!(error = %e, "encryption failed, storing plaintext");
                Sealed {
                    text: plaintext.to_string(),
                    encrypted: false,
                }
            }
        }
    }

    /// Opens `input`, returning it unchanged if it is not sealed or cannot
    /// be decrypted.
    ///
    /// Callers must treat the result as "may already be plaintext".
    pub fn open(&self, input: &str) -> String {
        if !is_sealed(input) {
            return input.to_string();
        }

        match self.try_open(input) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.decrypt_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.note_fallback(format!("open: {e}"));
                warn!(error = %e, "decryption failed, returning input unchanged");
                input.to_string()
            }
        }
    }

    /// Returns where the active key came from.
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        self.key_source
    }

    /// Returns a health snapshot.
    #[must_use]
    pub fn health(&self) -> CryptoHealth {
        CryptoHealth {
            key_source: self.key_source,
            encrypt_fallbacks: self.encrypt_fallbacks.load(Ordering::Relaxed),
            decrypt_fallbacks: self.decrypt_fallbacks.load(Ordering::Relaxed),
            last_fallback: self.last_fallback.read().clone(),
        }
    }

    fn note_fallback(&self, reason: String) {
        *self.last_fallback.write() = Some(reason);
    }
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto")
            .field("key_source", &self.key_source)
            .field("encrypt_fallbacks", &self.encrypt_fallbacks)
            .field("decrypt_fallbacks", &self.decrypt_fallbacks)
            .finish_non_exhaustive()
    }
}

/// Encrypts `plaintext` under `key` with the fail-open policy.
#[must_use]
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Sealed {
    Crypto::new(key.clone(), KeySource::Loaded).seal(plaintext)
}

/// Decrypts `ciphertext` under `key`, returning the input on failure.
#[must_use]
pub fn decrypt(ciphertext: &str, key: &EncryptionKey) -> String {
    Crypto::new(key.clone(), KeySource::Loaded).open(ciphertext)
}
