//! Byte pumps between a local TCP socket and a mesh stream, with half-close
//! in both directions: a socket EOF becomes STREAM_EOF, a stream EOF becomes
//! a socket write shutdown, and either side keeps flowing until both ends
//! have finished.

use metroo_core::ResetReason;
use metroo_link::Stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

const COPY_BUF: usize = 16 * 1024;

/// Relay until both directions are done. Consumes both endpoints.
pub async fn tcp_stream(socket: TcpStream, stream: Stream) {
    let (mut sock_rd, mut sock_wr) = socket.into_split();
    let (mut mesh_rd, mut mesh_wr) = stream.into_split();

    // Socket → mesh runs as its own task so both directions make progress.
    let inbound = tokio::spawn(async move {
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            match sock_rd.read(&mut buf).await {
                Ok(0) => {
                    let _ = mesh_wr.write_eof().await;
                    break;
                }
                Ok(n) => {
                    if mesh_wr.write(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => {
                    mesh_wr.reset(ResetReason::PeerClosed).await;
                    break;
                }
            }
        }
    });

    // Mesh → socket runs inline.
    let mut orderly = false;
    loop {
        match mesh_rd.read().await {
            Ok(Some(chunk)) => {
                if sock_wr.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                orderly = true;
                let _ = sock_wr.shutdown().await;
                break;
            }
            Err(e) => {
                trace!(error = %e, "mesh side of relay ended");
                break;
            }
        }
    }

    if orderly {
        // Half-close: the client may still be sending; wait for its EOF.
        let _ = inbound.await;
    } else {
        // Reset or socket failure: tear the other direction down too.
        inbound.abort();
        let _ = inbound.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metroo_crypto::Identity;
    use metroo_link::conn::memory_pair;
    use metroo_link::peer::{LinkConfig, LinkEvent, LinkRole, PeerLink};
    use metroo_link::{handshake, HandshakeConfig};
    use metroo_core::StreamKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn socket_eof_propagates_and_reply_comes_back() {
        // Mesh pair: A opens a stream to B; B's responder bridges it to a
        // local TCP server that reads-all-then-replies.
        let ia = Identity::generate();
        let ib = Identity::generate();
        let (mut ca, mut cb) = memory_pair(256);
        let hs = HandshakeConfig::default();
        let (ra, rb) = tokio::join!(handshake(&mut ca, &ia, &hs), handshake(&mut cb, &ib, &hs));
        let (a, _a_events) = PeerLink::spawn(
            ca,
            ia.agent_id(),
            ra.unwrap(),
            LinkRole::Dialer,
            metroo_core::TransportKind::Ws,
            LinkConfig::default(),
            Arc::new(AtomicUsize::new(0)),
        );
        let (b, mut b_events) = PeerLink::spawn(
            cb,
            ib.agent_id(),
            rb.unwrap(),
            LinkRole::Listener,
            metroo_core::TransportKind::Ws,
            LinkConfig::default(),
            Arc::new(AtomicUsize::new(0)),
        );

        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = server.accept().await.unwrap();
            let mut data = Vec::new();
            sock.read_to_end(&mut data).await.unwrap();
            sock.write_all(format!("len={}", data.len()).as_bytes())
                .await
                .unwrap();
        });

        tokio::spawn(async move {
            while let Some(event) = b_events.recv().await {
                if let LinkEvent::Open { stream_id, open } = event {
                    let link = b.clone();
                    tokio::spawn(async move {
                        let stream = link.accept_stream(stream_id, &open).await.unwrap();
                        let socket = TcpStream::connect(server_addr).await.unwrap();
                        tcp_stream(socket, stream).await;
                    });
                }
            }
        });

        let mut stream = a
            .open_stream(ib.agent_id(), StreamKind::Tcp, None, true)
            .await
            .unwrap();
        stream.write(b"0123456789").await.unwrap();
        stream.write_eof().await.unwrap();
        let mut reply = Vec::new();
        while let Some(chunk) = stream.read().await.unwrap() {
            reply.extend_from_slice(&chunk);
        }
        assert_eq!(reply, b"len=10");
    }
}
