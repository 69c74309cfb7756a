//! Sealed boxes under the long-term management X25519 key.
//!
//! `eph_pub(32) || ciphertext`: a fresh ephemeral per box, key derived with
//! HKDF-SHA256 over the ephemeral-static shared secret with both public keys
//! as salt. The key is single-use, so the zero nonce is safe.

use crate::{CryptoError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

const SEALED_INFO: &[u8] = b"metroo sealed v1";

/// A parsed management key, public half always present.
#[derive(Clone)]
pub struct SealedKey {
    public: PublicKey,
    private: Option<StaticSecret>,
}

impl SealedKey {
    pub fn from_hex(public_hex: &str, private_hex: Option<&str>) -> Result<Self> {
        let public = PublicKey::from(decode32(public_hex, "public key")?);
        let private = match private_hex {
            Some(h) => {
                let secret = StaticSecret::from(decode32(h, "private key")?);
                if PublicKey::from(&secret).as_bytes() != public.as_bytes() {
                    return Err(CryptoError::Key(
                        "management private key does not match public key".into(),
                    ));
                }
                Some(secret)
            }
            None => None,
        };
        Ok(Self { public, private })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Whether this agent can open boxes, not just produce them.
    pub fn can_open(&self) -> bool {
        self.private.is_some()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        seal_to(&self.public, plaintext)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let private = self
            .private
            .as_ref()
            .ok_or_else(|| CryptoError::Key("management private key not configured".into()))?;
        open_sealed(private, sealed)
    }
}

fn decode32(s: &str, what: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(s).map_err(|_| CryptoError::Key(format!("{what} is not hex")))?;
    raw.try_into()
        .map_err(|_| CryptoError::Key(format!("{what} must be 32 bytes")))
}

fn box_key(shared: &[u8], eph_pub: &PublicKey, recipient: &PublicKey) -> ChaCha20Poly1305 {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(eph_pub.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    let _ = hk.expand(SEALED_INFO, key.as_mut());
    ChaCha20Poly1305::new(Key::from_slice(key.as_ref()))
}

/// Seal `plaintext` so only the holder of the private half of `recipient`
/// can open it.
pub fn seal_to(recipient: &PublicKey, plaintext: &[u8]) -> Vec<u8> {
    let eph = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let eph_pub = PublicKey::from(&eph);
    let shared = eph.diffie_hellman(recipient);
    let cipher = box_key(shared.as_bytes(), &eph_pub, recipient);

    let mut out = Vec::with_capacity(32 + plaintext.len() + 16);
    out.extend_from_slice(eph_pub.as_bytes());
    // Encryption with ChaCha20-Poly1305 cannot fail for in-memory buffers.
    if let Ok(ct) = cipher.encrypt(&Nonce::default(), plaintext) {
        out.extend_from_slice(&ct);
    }
    out
}

pub fn open_sealed(private: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < 32 + 16 {
        return Err(CryptoError::Truncated);
    }
    let eph_bytes: [u8; 32] = sealed[..32]
        .try_into()
        .map_err(|_| CryptoError::Truncated)?;
    let eph_pub = PublicKey::from(eph_bytes);
    let recipient = PublicKey::from(private);
    let shared = private.diffie_hellman(&eph_pub);
    let cipher = box_key(shared.as_bytes(), &eph_pub, &recipient);
    cipher
        .decrypt(&Nonce::default(), &sealed[32..])
        .map_err(|_| CryptoError::Aead)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        let sealed = seal_to(&public, b"topology");
        assert_eq!(open_sealed(&secret, &sealed).unwrap(), b"topology");
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        let other = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let sealed = seal_to(&public, b"topology");
        assert!(open_sealed(&other, &sealed).is_err());
    }

    #[test]
    fn truncated_box_is_rejected() {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        assert!(matches!(
            open_sealed(&secret, &[0u8; 40]),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn sealed_key_pairing_is_checked() {
        let a = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let b = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let pub_hex = hex::encode(PublicKey::from(&a).as_bytes());
        let bad_priv = hex::encode(b.to_bytes());
        assert!(SealedKey::from_hex(&pub_hex, Some(&bad_priv)).is_err());
        let good_priv = hex::encode(a.to_bytes());
        let key = SealedKey::from_hex(&pub_hex, Some(&good_priv)).unwrap();
        assert!(key.can_open());
        let boxed = key.seal(b"x");
        assert_eq!(key.open(&boxed).unwrap(), b"x");
    }
}
