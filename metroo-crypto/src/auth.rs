//! Link handshake authenticator.
//!
//! The identity keypair is X25519 and cannot sign, so PEER_WELCOME proves key
//! possession the Noise way: both sides derive an authentication key from the
//! static-static Diffie-Hellman and MAC the challenge nonce together with the
//! two agent ids. Without the private half of the advertised public key the
//! tag cannot be produced.

use crate::identity::Identity;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use metroo_core::AgentId;
use sha2::Sha256;
use x25519_dalek::PublicKey;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const AUTH_INFO: &[u8] = b"metroo link auth v1";

pub const TAG_LEN: usize = 32;

fn auth_key(identity: &Identity, their_public: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = identity.diffie_hellman(their_public);
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    // Output length 32 is always valid for HKDF-SHA256.
    let _ = hk.expand(AUTH_INFO, key.as_mut());
    key
}

/// Tag sent in our PEER_WELCOME: covers the peer's challenge nonce, our id,
/// then theirs, so the two directions never produce the same tag.
pub fn welcome_tag(
    identity: &Identity,
    their_public: &PublicKey,
    their_nonce: &[u8; 32],
    our_id: AgentId,
    their_id: AgentId,
) -> [u8; TAG_LEN] {
    let key = auth_key(identity, their_public);
    #[allow(clippy::expect_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref()).expect("hmac key length");
    mac.update(their_nonce);
    mac.update(our_id.as_bytes());
    mac.update(their_id.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Verify the tag the peer sent in its PEER_WELCOME against our challenge.
pub fn verify_welcome_tag(
    identity: &Identity,
    their_public: &PublicKey,
    our_nonce: &[u8; 32],
    their_id: AgentId,
    our_id: AgentId,
    tag: &[u8],
) -> bool {
    let key = auth_key(identity, their_public);
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key.as_ref()) else {
        return false;
    };
    mac.update(our_nonce);
    mac.update(their_id.as_bytes());
    mac.update(our_id.as_bytes());
    mac.verify_slice(tag).is_ok()
}
