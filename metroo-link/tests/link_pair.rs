//! Two agents joined by an in-memory transport: open streams, move data,
//! half-close, reset, and watch the flow-control windows do their job.

use metroo_core::{AgentId, Error, ResetReason, StreamKind};
use metroo_crypto::Identity;
use metroo_link::conn::memory_pair;
use metroo_link::peer::{LinkConfig, LinkEvent, LinkRole, PeerLink};
use metroo_link::{handshake, HandshakeConfig, MuxConfig, StreamState};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Pair {
    a: Arc<PeerLink>,
    b: Arc<PeerLink>,
    a_events: mpsc::Receiver<LinkEvent>,
    b_events: mpsc::Receiver<LinkEvent>,
    a_id: AgentId,
    b_id: AgentId,
}

async fn establish(cfg: LinkConfig) -> Pair {
    let ia = Identity::generate();
    let ib = Identity::generate();
    let (mut conn_a, mut conn_b) = memory_pair(256);
    let hs = HandshakeConfig::default();
    let (ra, rb) = tokio::join!(
        handshake(&mut conn_a, &ia, &hs),
        handshake(&mut conn_b, &ib, &hs),
    );
    let (info_a, info_b) = (ra.unwrap(), rb.unwrap());
    let (a, a_events) = PeerLink::spawn(
        conn_a,
        ia.agent_id(),
        info_a,
        LinkRole::Dialer,
        metroo_core::TransportKind::Quic,
        cfg.clone(),
        Arc::new(AtomicUsize::new(0)),
    );
    let (b, b_events) = PeerLink::spawn(
        conn_b,
        ib.agent_id(),
        info_b,
        LinkRole::Listener,
        metroo_core::TransportKind::Quic,
        cfg,
        Arc::new(AtomicUsize::new(0)),
    );
    Pair {
        a,
        b,
        a_events,
        b_events,
        a_id: ia.agent_id(),
        b_id: ib.agent_id(),
    }
}

/// Accept every incoming stream on `link` and echo until EOF, then EOF back.
fn spawn_echo_responder(link: Arc<PeerLink>, mut events: mpsc::Receiver<LinkEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let LinkEvent::Open { stream_id, open } = event {
                let link = link.clone();
                tokio::spawn(async move {
                    let stream = link.accept_stream(stream_id, &open).await.unwrap();
                    let (mut rd, mut wr) = stream.into_split();
                    while let Some(chunk) = rd.read().await.unwrap() {
                        wr.write(&chunk).await.unwrap();
                    }
                    wr.write_eof().await.unwrap();
                });
            }
        }
    });
}

#[tokio::test]
async fn stream_echo_round_trip() {
    let pair = establish(LinkConfig::default()).await;
    spawn_echo_responder(pair.b.clone(), pair.b_events);

    let mut stream = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap();
    assert_eq!(stream.state(), StreamState::Open);
    assert_eq!(stream.id() % 2, 1, "dialer-side streams are odd");

    stream.write(b"hello mesh").await.unwrap();
    stream.write_eof().await.unwrap();

    let mut echoed = Vec::new();
    while let Some(chunk) = stream.read().await.unwrap() {
        echoed.extend_from_slice(&chunk);
    }
    assert_eq!(echoed, b"hello mesh");
    assert_eq!(stream.state(), StreamState::Closed);
}

#[tokio::test]
async fn e2e_sealed_stream_round_trips() {
    let pair = establish(LinkConfig::default()).await;
    spawn_echo_responder(pair.b.clone(), pair.b_events);

    let mut stream = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, true)
        .await
        .unwrap();
    let body = vec![0xabu8; 200_000];
    stream.write(&body).await.unwrap();
    stream.write_eof().await.unwrap();

    let mut echoed = Vec::new();
    while let Some(chunk) = stream.read().await.unwrap() {
        echoed.extend_from_slice(&chunk);
    }
    assert_eq!(echoed, body);
}

#[tokio::test]
async fn half_close_lets_the_peer_keep_writing() {
    let pair = establish(LinkConfig::default()).await;

    // Responder that reads everything, then writes a reply after client EOF.
    let link_b = pair.b.clone();
    let mut b_events = pair.b_events;
    tokio::spawn(async move {
        while let Some(event) = b_events.recv().await {
            if let LinkEvent::Open { stream_id, open } = event {
                let link = link_b.clone();
                tokio::spawn(async move {
                    let stream = link.accept_stream(stream_id, &open).await.unwrap();
                    let (mut rd, mut wr) = stream.into_split();
                    let mut total = 0;
                    while let Some(chunk) = rd.read().await.unwrap() {
                        total += chunk.len();
                    }
                    wr.write(format!("got {total}").as_bytes()).await.unwrap();
                    wr.write_eof().await.unwrap();
                });
            }
        }
    });

    let mut stream = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap();
    stream.write(b"request body").await.unwrap();
    stream.write_eof().await.unwrap();
    assert_eq!(stream.state(), StreamState::HalfClosedLocal);

    let reply = stream.read().await.unwrap().unwrap();
    assert_eq!(&reply[..], b"got 12");
    assert_eq!(stream.read().await.unwrap(), None);
    assert_eq!(stream.state(), StreamState::Closed);
}

#[tokio::test]
async fn window_grants_keep_large_transfers_moving() {
    // Tiny window forces many WINDOW grant cycles.
    let cfg = LinkConfig {
        mux: MuxConfig {
            initial_window: 4096,
            ..MuxConfig::default()
        },
        ..LinkConfig::default()
    };
    let pair = establish(cfg).await;
    spawn_echo_responder(pair.b.clone(), pair.b_events);

    let mut stream = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap();
    let body = vec![7u8; 64 * 1024];
    let (mut rd, mut wr) = stream.into_split();
    let writer = tokio::spawn({
        let body = body.clone();
        async move {
            wr.write(&body).await.unwrap();
            wr.write_eof().await.unwrap();
        }
    });
    let mut echoed = Vec::new();
    while let Some(chunk) = rd.read().await.unwrap() {
        echoed.extend_from_slice(&chunk);
    }
    writer.await.unwrap();
    assert_eq!(echoed, body);
}

#[tokio::test]
async fn rejection_maps_to_error() {
    let pair = establish(LinkConfig::default()).await;
    let link_b = pair.b.clone();
    let mut b_events = pair.b_events;
    tokio::spawn(async move {
        while let Some(event) = b_events.recv().await {
            if let LinkEvent::Open { stream_id, .. } = event {
                link_b.reject_stream(stream_id, ResetReason::NoRoute).await;
            }
        }
    });

    let err = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoRoute(_)));
}

#[tokio::test]
async fn per_link_stream_cap_is_enforced() {
    let cfg = LinkConfig {
        mux: MuxConfig {
            max_streams: 3,
            ..MuxConfig::default()
        },
        ..LinkConfig::default()
    };
    let pair = establish(cfg).await;
    spawn_echo_responder(pair.b.clone(), pair.b_events);

    // Opening up to the cap succeeds.
    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(
            pair.a
                .open_stream(pair.b_id, StreamKind::Tcp, None, false)
                .await
                .unwrap(),
        );
    }
    // One past the cap is refused locally.
    let err = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LimitExceeded(_)));
    for mut s in held {
        s.reset(ResetReason::PeerClosed).await;
    }
}

#[tokio::test]
async fn reset_reaches_the_reader() {
    let pair = establish(LinkConfig::default()).await;
    let link_b = pair.b.clone();
    let mut b_events = pair.b_events;
    tokio::spawn(async move {
        while let Some(event) = b_events.recv().await {
            if let LinkEvent::Open { stream_id, open } = event {
                let link = link_b.clone();
                tokio::spawn(async move {
                    let mut stream = link.accept_stream(stream_id, &open).await.unwrap();
                    stream.reset(ResetReason::Forbidden).await;
                });
            }
        }
    });

    let mut stream = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap();
    let err = loop {
        match stream.read().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected reset, got EOF"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, Error::Reset(ResetReason::Forbidden)));
}

#[tokio::test]
async fn link_close_resets_streams_and_reports_closed() {
    let pair = establish(LinkConfig::default()).await;
    spawn_echo_responder(pair.b.clone(), pair.b_events);

    let mut stream = pair
        .a
        .open_stream(pair.b_id, StreamKind::Tcp, None, false)
        .await
        .unwrap();
    pair.a.close();

    let err = loop {
        match stream.read().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected reset after link close"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, Error::Reset(ResetReason::PeerClosed)));

    let mut a_events = pair.a_events;
    let closed = tokio::time::timeout(Duration::from_secs(5), async move {
        while let Some(event) = a_events.recv().await {
            if matches!(event, LinkEvent::Closed) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn keepalives_measure_rtt() {
    let cfg = LinkConfig {
        keepalive_interval: Duration::from_millis(20),
        ..LinkConfig::default()
    };
    let pair = establish(cfg).await;
    // Park the event receivers so the links stay healthy.
    let _keep = (pair.a_events, pair.b_events);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(pair.a.rtt().is_some());
    assert!(pair.b.rtt().is_some());
    assert_eq!(pair.a.remote_id(), pair.b_id);
    assert_eq!(pair.b.remote_id(), pair.a_id);
}

#[tokio::test]
async fn dedup_keys_agree_across_roles() {
    let pair = establish(LinkConfig::default()).await;
    let _keep = (pair.a_events, pair.b_events);
    assert_eq!(pair.a.dedup_key(), (pair.a_id, pair.b_id));
    assert_eq!(pair.b.dedup_key(), (pair.a_id, pair.b_id));
}

#[tokio::test]
async fn silent_peer_is_closed_after_missed_keepalives() {
    let ia = Identity::generate();
    let ib = Identity::generate();
    let (mut conn_a, mut conn_b) = memory_pair(256);
    let hs = HandshakeConfig::default();
    let (ra, _rb) = tokio::join!(
        handshake(&mut conn_a, &ia, &hs),
        handshake(&mut conn_b, &ib, &hs),
    );
    let cfg = LinkConfig {
        keepalive_interval: Duration::from_millis(20),
        dead_after: Duration::from_millis(60),
        ..LinkConfig::default()
    };
    let (a, mut a_events) = PeerLink::spawn(
        conn_a,
        ia.agent_id(),
        ra.unwrap(),
        LinkRole::Dialer,
        metroo_core::TransportKind::Quic,
        cfg,
        Arc::new(AtomicUsize::new(0)),
    );

    // The other side never runs a link session, so keepalives go unanswered;
    // conn_b stays alive so this is not a transport EOF.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = a_events.recv().await {
            if matches!(event, LinkEvent::Closed) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(closed, "link must close after missed keepalive acks");
    assert!(a.is_closed());
    drop(conn_b);
}
