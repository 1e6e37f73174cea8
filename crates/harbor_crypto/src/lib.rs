//! # Harbor Crypto
//!
//! Symmetric sealing, one-way hashing and key management for Harbor.
//!
//! ## Security Model
//!
//! - AES-256-GCM with a random 96-bit nonce per encryption
//! - Sealed values are strings: `hv1:` followed by base64 of
//!   `nonce || ciphertext || tag`
//! - Keys are zeroized on drop and never printed
//! - Credentials are hashed with Argon2id and never stored in plaintext
//!
//! ## Fail-open sealing
//!
//! [`Crypto::seal`] and [`Crypto::open`] never fail. When the cipher errors,
//! `seal` hands back the plaintext with `encrypted = false` and `open` hands
//! back its input unchanged. Every such fallback is counted and logged so
//! the host can observe it through [`Crypto::health`].
//!
//! ## Usage
//!
//! ```rust
//! use harbor_crypto::{Crypto, EncryptionKey, KeySource};
//!
//! let crypto = Crypto::new(EncryptionKey::generate(), KeySource::Generated);
//! let sealed = crypto.seal("secret");
//! assert!(sealed.encrypted);
//! assert_eq!(crypto.open(&sealed.text), "secret");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cipher;
mod error;
mod hash;
mod key;
mod keystore;
mod seal;

pub use cipher::{AesGcmCipher, Cipher, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use hash::{hash, hash_credential, verify_credential};
pub use key::{EncryptionKey, KEY_SIZE};
pub use keystore::{resolve_key, KeySource, KeyStore, MemoryKeyStore, ResolvedKey};
pub use seal::{decrypt, encrypt, is_sealed, Crypto, CryptoHealth, Sealed, SEALED_PREFIX};
