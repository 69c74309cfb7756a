#![forbid(unsafe_code)]

//! Muti Metroo cryptography engine.
//!
//! Three jobs: the HMAC authenticator that binds a link handshake to the
//! peers' long-lived X25519 keys, the per-stream end-to-end session
//! (X25519 ephemerals + HKDF-SHA256 + ChaCha20-Poly1305) that intermediate
//! hops cannot open, and the sealed boxes that hide node info and control
//! payloads from everyone but the management key holder.

pub mod auth;
pub mod identity;
pub mod password;
pub mod sealed;
pub mod session;

use thiserror::Error;

pub type Result<T, E = CryptoError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("aead open failed")]
    Aead,
    #[error("nonce counter exhausted")]
    NonceExhausted,
    #[error("bad key material: {0}")]
    Key(String),
    #[error("sealed box too short")]
    Truncated,
    #[error("identity: {0}")]
    Identity(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for metroo_core::Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Identity(msg) => metroo_core::Error::Identity(msg),
            CryptoError::Io(err) => metroo_core::Error::Identity(err.to_string()),
            other => metroo_core::Error::Crypto(other.to_string()),
        }
    }
}

pub use identity::Identity;
pub use sealed::{open_sealed, seal_to, SealedKey};
pub use session::{SessionCrypto, SESSION_KEY_LEN};
