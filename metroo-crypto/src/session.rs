//! End-to-end stream session between ingress and exit.
//!
//! Both ends derive direction-separated ChaCha20-Poly1305 keys from the
//! X25519 shared secret of the ephemerals exchanged in STREAM_OPEN /
//! STREAM_OPEN_ACK, with the two agent ids and the stream id folded into the
//! HKDF info. Nonces are implicit 64-bit counters: stream bytes are strict
//! FIFO, so both counters stay in lockstep. Counter wrap is fatal.

use crate::{CryptoError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use metroo_core::AgentId;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zeroize::Zeroizing;

pub const SESSION_KEY_LEN: usize = 32;

const INFO_INITIATOR: &[u8] = b"metroo e2e v1 initiator";
const INFO_RESPONDER: &[u8] = b"metroo e2e v1 responder";

/// Which end of the stream we are. The ingress (the side that sent
/// STREAM_OPEN) is the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// Generate the ephemeral for one end of the exchange.
pub fn ephemeral() -> (EphemeralSecret, PublicKey) {
    let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Sealing/opening state for one stream. Immutable after derivation apart
/// from the atomic counters, so it is shared without a lock.
pub struct SessionCrypto {
    seal: ChaCha20Poly1305,
    open: ChaCha20Poly1305,
    seal_counter: AtomicU64,
    open_counter: AtomicU64,
}

impl SessionCrypto {
    /// Derive both direction keys. `initiator`/`responder` are the ingress
    /// and exit agent ids; `stream_id` is the id the initiator allocated.
    pub fn derive(
        secret: EphemeralSecret,
        their_public: &PublicKey,
        role: SessionRole,
        initiator: AgentId,
        responder: AgentId,
        stream_id: u64,
    ) -> Self {
        let shared = secret.diffie_hellman(their_public);
        Self::from_shared(&shared, role, initiator, responder, stream_id)
    }

    fn from_shared(
        shared: &SharedSecret,
        role: SessionRole,
        initiator: AgentId,
        responder: AgentId,
        stream_id: u64,
    ) -> Self {
        let mut salt = Vec::with_capacity(16 + 16 + 8);
        salt.extend_from_slice(initiator.as_bytes());
        salt.extend_from_slice(responder.as_bytes());
        salt.extend_from_slice(&stream_id.to_be_bytes());

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        let mut k_init = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        let mut k_resp = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        // 32-byte outputs are always valid for HKDF-SHA256.
        let _ = hk.expand(INFO_INITIATOR, k_init.as_mut());
        let _ = hk.expand(INFO_RESPONDER, k_resp.as_mut());

        let (seal_key, open_key) = match role {
            SessionRole::Initiator => (k_init, k_resp),
            SessionRole::Responder => (k_resp, k_init),
        };
        Self {
            seal: ChaCha20Poly1305::new(Key::from_slice(seal_key.as_ref())),
            open: ChaCha20Poly1305::new(Key::from_slice(open_key.as_ref())),
            seal_counter: AtomicU64::new(0),
            open_counter: AtomicU64::new(0),
        }
    }

    /// Seal one STREAM_DATA payload. Adds a 16-byte tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let seq = self.next(&self.seal_counter)?;
        self.seal
            .encrypt(&counter_nonce(seq), plaintext)
            .map_err(|_| CryptoError::Aead)
    }

    /// Open one STREAM_DATA payload. Failure means the stream must reset;
    /// the counter is burned either way so a tampered frame cannot be
    /// replayed against a retry.
    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let seq = self.next(&self.open_counter)?;
        self.open
            .decrypt(&counter_nonce(seq), ciphertext)
            .map_err(|_| CryptoError::Aead)
    }

    fn next(&self, counter: &AtomicU64) -> Result<u64> {
        let seq = counter.fetch_add(1, Ordering::Relaxed);
        if seq == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        Ok(seq)
    }
}

fn counter_nonce(seq: u64) -> Nonce {
    let mut n = [0u8; 12];
    n[4..].copy_from_slice(&seq.to_be_bytes());
    Nonce::from(n)
}

/// Parse a 32-byte public key received on the wire.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::Key("public key must be 32 bytes".into()))?;
    Ok(PublicKey::from(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SessionCrypto, SessionCrypto) {
        let (a_sec, a_pub) = ephemeral();
        let (b_sec, b_pub) = ephemeral();
        let ingress = AgentId::from_bytes([1; 16]);
        let exit = AgentId::from_bytes([2; 16]);
        let a = SessionCrypto::derive(a_sec, &b_pub, SessionRole::Initiator, ingress, exit, 7);
        let b = SessionCrypto::derive(b_sec, &a_pub, SessionRole::Responder, ingress, exit, 7);
        (a, b)
    }

    #[test]
    fn seal_open_round_trip() {
        let (a, b) = pair();
        let ct = a.seal(b"hello mesh").unwrap();
        assert_eq!(b.open(&ct).unwrap(), b"hello mesh");
        // And the reverse direction uses an independent key.
        let ct2 = b.seal(b"reply").unwrap();
        assert_eq!(a.open(&ct2).unwrap(), b"reply");
    }

    #[test]
    fn counters_keep_directions_in_lockstep() {
        let (a, b) = pair();
        for i in 0..32u32 {
            let msg = i.to_be_bytes();
            let ct = a.seal(&msg).unwrap();
            assert_eq!(b.open(&ct).unwrap(), msg);
        }
    }

    #[test]
    fn reordered_frame_fails_to_open() {
        let (a, b) = pair();
        let first = a.seal(b"one").unwrap();
        let second = a.seal(b"two").unwrap();
        // Deliver out of order: the counter mismatch must be fatal.
        assert!(b.open(&second).is_err());
        let _ = first;
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (a, b) = pair();
        let mut ct = a.seal(b"payload").unwrap();
        ct[0] ^= 0x80;
        assert!(b.open(&ct).is_err());
    }

    #[test]
    fn different_stream_ids_derive_different_keys() {
        let (a_sec, a_pub) = ephemeral();
        let (b_sec, b_pub) = ephemeral();
        let ingress = AgentId::from_bytes([1; 16]);
        let exit = AgentId::from_bytes([2; 16]);
        let a = SessionCrypto::derive(a_sec, &b_pub, SessionRole::Initiator, ingress, exit, 1);
        let b = SessionCrypto::derive(b_sec, &a_pub, SessionRole::Responder, ingress, exit, 3);
        let ct = a.seal(b"x").unwrap();
        assert!(b.open(&ct).is_err());
    }
}
