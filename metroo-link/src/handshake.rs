//! Link handshake: HELLO exchange, identity cross-checks, WELCOME
//! authenticators. Runs on a fresh transport connection before the link
//! session starts; failure closes the connection and is never retried on it.

use crate::conn::Connection;
use crate::frame::{Frame, FrameType};
use crate::payload::{Hello, Welcome, PROTOCOL_VERSION};
use metroo_core::{AgentId, Error, HandshakeFailure, Result};
use metroo_crypto::auth;
use metroo_crypto::Identity;
use std::time::Duration;
use x25519_dalek::PublicKey;

/// Feature bits advertised in PEER_HELLO. Unknown bits are ignored.
pub const FEATURE_E2E: u32 = 0x01;
pub const FEATURE_UDP: u32 = 0x02;
pub const FEATURE_ICMP: u32 = 0x04;

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub deadline: Duration,
    /// Required remote identity for dialed peers configured with an id.
    pub expected_peer: Option<AgentId>,
    pub display_name: String,
    pub features: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            expected_peer: None,
            display_name: String::new(),
            features: FEATURE_E2E,
        }
    }
}

/// What the handshake learned about the remote agent.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub agent_id: AgentId,
    pub public_key: PublicKey,
    pub features: u32,
    pub display_name: String,
}

/// Run the handshake on both roles symmetrically: send HELLO, read HELLO,
/// send WELCOME, read WELCOME, verify.
pub async fn handshake(
    conn: &mut Connection,
    identity: &Identity,
    cfg: &HandshakeConfig,
) -> Result<PeerInfo> {
    match tokio::time::timeout(cfg.deadline, run(conn, identity, cfg)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Handshake(HandshakeFailure::Timeout)),
    }
}

async fn run(conn: &mut Connection, identity: &Identity, cfg: &HandshakeConfig) -> Result<PeerInfo> {
    let nonce: [u8; 32] = rand::random();
    let hello = Hello {
        version: PROTOCOL_VERSION,
        agent_id: identity.agent_id(),
        public_key: *identity.public_key().as_bytes(),
        features: cfg.features,
        nonce,
        display_name: cfg.display_name.clone(),
    };
    conn.writer
        .write_frame(Frame::new(FrameType::PeerHello, 0, hello.encode()))
        .await?;

    let frame = read_expect(conn, FrameType::PeerHello).await?;
    let their_hello = Hello::decode(&frame.payload)?;
    if their_hello.version != PROTOCOL_VERSION {
        return Err(Error::Handshake(HandshakeFailure::UnsupportedVersion(
            their_hello.version,
        )));
    }
    if their_hello.agent_id == identity.agent_id() {
        // Connected to ourselves, directly or through a loop.
        return Err(Error::Handshake(HandshakeFailure::IdentityMismatch));
    }
    if let Some(expected) = cfg.expected_peer {
        if their_hello.agent_id != expected {
            return Err(Error::Handshake(HandshakeFailure::IdentityMismatch));
        }
    }
    if let Some(tls_key) = conn.remote_tls_identity {
        if tls_key != their_hello.public_key {
            return Err(Error::Handshake(HandshakeFailure::IdentityMismatch));
        }
    }
    let their_public = PublicKey::from(their_hello.public_key);

    let welcome = Welcome {
        agent_id: identity.agent_id(),
        auth_tag: auth::welcome_tag(
            identity,
            &their_public,
            &their_hello.nonce,
            identity.agent_id(),
            their_hello.agent_id,
        ),
    };
    conn.writer
        .write_frame(Frame::new(FrameType::PeerWelcome, 0, welcome.encode()))
        .await?;

    let frame = read_expect(conn, FrameType::PeerWelcome).await?;
    let their_welcome = Welcome::decode(&frame.payload)?;
    if their_welcome.agent_id != their_hello.agent_id {
        return Err(Error::Handshake(HandshakeFailure::IdentityMismatch));
    }
    if !auth::verify_welcome_tag(
        identity,
        &their_public,
        &nonce,
        their_hello.agent_id,
        identity.agent_id(),
        &their_welcome.auth_tag,
    ) {
        return Err(Error::Handshake(HandshakeFailure::BadAuthenticator));
    }

    Ok(PeerInfo {
        agent_id: their_hello.agent_id,
        public_key: their_public,
        features: their_hello.features,
        display_name: their_hello.display_name,
    })
}

async fn read_expect(conn: &mut Connection, expected: FrameType) -> Result<Frame> {
    let frame = conn
        .reader
        .read_frame()
        .await?
        .ok_or_else(|| Error::transport("connection closed during handshake"))?;
    if frame.frame_type != expected {
        return Err(Error::protocol(format!(
            "expected {expected:?} during handshake, got {:?}",
            frame.frame_type
        )));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::memory_pair;

    async fn run_pair(
        cfg_a: HandshakeConfig,
        cfg_b: HandshakeConfig,
    ) -> (Result<PeerInfo>, Result<PeerInfo>, Identity, Identity) {
        let a = Identity::generate();
        let b = Identity::generate();
        let (mut conn_a, mut conn_b) = memory_pair(8);
        let (ra, rb) = tokio::join!(
            handshake(&mut conn_a, &a, &cfg_a),
            handshake(&mut conn_b, &b, &cfg_b),
        );
        (ra, rb, a, b)
    }

    #[tokio::test]
    async fn both_sides_establish() {
        let (ra, rb, a, b) = run_pair(HandshakeConfig::default(), HandshakeConfig::default()).await;
        let ra = ra.unwrap();
        let rb = rb.unwrap();
        assert_eq!(ra.agent_id, b.agent_id());
        assert_eq!(rb.agent_id, a.agent_id());
        assert_eq!(ra.public_key.as_bytes(), b.public_key().as_bytes());
    }

    #[tokio::test]
    async fn expected_peer_mismatch_fails() {
        // Short deadlines on both sides: the healthy peer would otherwise
        // wait out its full deadline for a WELCOME that never comes.
        let quick = HandshakeConfig {
            deadline: Duration::from_millis(300),
            ..HandshakeConfig::default()
        };
        let cfg = HandshakeConfig {
            expected_peer: Some(AgentId::from_bytes([0xaa; 16])),
            ..quick.clone()
        };
        let (ra, _rb, _a, _b) = run_pair(cfg, quick).await;
        assert!(matches!(
            ra,
            Err(Error::Handshake(HandshakeFailure::IdentityMismatch))
        ));
    }

    #[tokio::test]
    async fn self_connection_is_rejected() {
        let identity = Identity::generate();
        let (mut conn_a, mut conn_b) = memory_pair(8);
        let cfg = HandshakeConfig::default();
        let (ra, _) = tokio::join!(
            handshake(&mut conn_a, &identity, &cfg),
            handshake(&mut conn_b, &identity, &cfg),
        );
        assert!(matches!(
            ra,
            Err(Error::Handshake(HandshakeFailure::IdentityMismatch))
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let identity = Identity::generate();
        let (mut conn_a, _conn_b) = memory_pair(8);
        let cfg = HandshakeConfig {
            deadline: Duration::from_millis(50),
            ..HandshakeConfig::default()
        };
        let result = handshake(&mut conn_a, &identity, &cfg).await;
        assert!(matches!(
            result,
            Err(Error::Handshake(HandshakeFailure::Timeout))
        ));
    }

    #[tokio::test]
    async fn tls_identity_mismatch_fails() {
        let a = Identity::generate();
        let b = Identity::generate();
        let (mut conn_a, mut conn_b) = memory_pair(8);
        // The transport claims a TLS identity that is not b's key.
        conn_a.remote_tls_identity = Some([0x55; 32]);
        let cfg = HandshakeConfig {
            deadline: Duration::from_millis(300),
            ..HandshakeConfig::default()
        };
        let (ra, _rb) = tokio::join!(
            handshake(&mut conn_a, &a, &cfg),
            handshake(&mut conn_b, &b, &cfg),
        );
        assert!(matches!(
            ra,
            Err(Error::Handshake(HandshakeFailure::IdentityMismatch))
        ));
    }
}
