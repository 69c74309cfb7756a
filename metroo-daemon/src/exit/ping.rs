//! One ICMP echo over an unprivileged datagram socket (`IPPROTO_ICMP` /
//! `IPPROTO_ICMPV6`). On Linux this needs the pinging process's group inside
//! `net.ipv4.ping_group_range`; failure to create the socket surfaces as an
//! exit-dial error on the stream, never a crash.

use metroo_core::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn build_echo(v6: bool, ident: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + payload.len());
    packet.push(if v6 { ECHO_REQUEST_V6 } else { ECHO_REQUEST_V4 });
    packet.push(0); // code
    packet.extend_from_slice(&[0, 0]); // checksum placeholder
    packet.extend_from_slice(&ident.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(payload);
    if !v6 {
        // The kernel computes the ICMPv6 checksum; v4 we fill ourselves.
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Send one echo request and wait for the matching reply. Returns the reply
/// payload. Blocking; callers run it on the blocking pool.
pub fn ping_once(
    target: IpAddr,
    ident: u16,
    seq: u16,
    payload: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let v6 = target.is_ipv6();
    let (domain, protocol) = if v6 {
        (Domain::IPV6, Protocol::ICMPV6)
    } else {
        (Domain::IPV4, Protocol::ICMPV4)
    };
    let mut socket = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(|e| {
        Error::ExitDial {
            kind: metroo_core::DialFailure::Other,
            detail: format!("icmp socket: {e}"),
        }
    })?;
    let addr = SocketAddr::new(target, 0);
    socket
        .connect(&addr.into())
        .map_err(|e| Error::exit_dial(&e))?;
    socket
        .send(&build_echo(v6, ident, seq, payload))
        .map_err(|e| Error::exit_dial(&e))?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 2048];
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or_else(|| Error::timeout(format!("ping {target}")))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| Error::exit_dial(&e))?;
        let n = match socket.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(Error::timeout(format!("ping {target}")));
            }
            Err(e) => return Err(Error::exit_dial(&e)),
        };
        if n < 8 {
            continue;
        }
        let reply = &buf[..n];
        let expected = if v6 { ECHO_REPLY_V6 } else { ECHO_REPLY_V4 };
        if reply[0] != expected {
            continue;
        }
        // Unprivileged sockets rewrite the identifier, so match on sequence.
        let reply_seq = u16::from_be_bytes([reply[6], reply[7]]);
        if reply_seq != seq {
            continue;
        }
        return Ok(reply[8..].to_vec());
    }
}
