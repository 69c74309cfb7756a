//! Request/response control plane over the mesh. Requests and responses are
//! CONTROL_REQ / CONTROL_RSP frames routed hop by hop like data; a 16-bit tag
//! plus a oneshot correlator stands in for coroutine-style waiting. With a
//! management key configured, bodies are sealed so transit agents and anyone
//! without the private half see only ciphertext.

use crate::supervisor::Supervisor;
use bytes::Bytes;
use metroo_core::{AgentId, Error, Result};
use metroo_crypto::SealedKey;
use metroo_link::payload::{ControlReq, ControlRsp};
use metroo_link::peer::PeerLink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Response status bytes, mirrored onto HTTP by the API layer.
pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
pub const STATUS_NO_KEY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlOp {
    Status,
    Peers,
    Routes,
    NodeInfo,
    Advertise,
}

pub struct ControlPlane {
    pending: Mutex<HashMap<u16, oneshot::Sender<ControlRsp>>>,
    next_tag: AtomicU16,
    timeout: Duration,
    mgmt: Option<SealedKey>,
}

impl ControlPlane {
    pub fn new(timeout: Duration, mgmt: Option<SealedKey>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_tag: AtomicU16::new(1),
            timeout,
            mgmt,
        }
    }

    pub fn sealing(&self) -> bool {
        self.mgmt.is_some()
    }

    /// Whether this agent holds the private half and may read topology.
    pub fn can_open(&self) -> bool {
        self.mgmt.as_ref().map(|k| k.can_open()).unwrap_or(true)
    }

    fn seal_body(&self, body: &[u8]) -> (Bytes, bool) {
        match &self.mgmt {
            Some(key) => (Bytes::from(key.seal(body)), true),
            None => (Bytes::copy_from_slice(body), false),
        }
    }

    fn open_body(&self, body: &[u8], sealed: bool) -> Result<Vec<u8>> {
        if !sealed {
            return Ok(body.to_vec());
        }
        let key = self
            .mgmt
            .as_ref()
            .ok_or_else(|| Error::crypto("sealed control payload without management key"))?;
        key.open(body).map_err(metroo_core::Error::from)
    }
}

/// Issue one control request and wait for the response.
pub async fn request(
    sup: &Arc<Supervisor>,
    dest: AgentId,
    op: ControlOp,
) -> Result<serde_json::Value> {
    if dest == sup.agent_id() {
        return serve_local(sup, op).await;
    }
    let control = sup.control();
    if control.sealing() && !control.can_open() {
        // Without the private half we could ask, but never read the answer.
        return Err(Error::crypto(
            "management key configured without its private half",
        ));
    }
    let body = serde_json::to_vec(&op).map_err(metroo_core::Error::from)?;
    let (body, sealed) = control.seal_body(&body);
    let tag = control.next_tag.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    control.pending.lock().insert(tag, tx);

    let req = ControlReq {
        dest,
        src: sup.agent_id(),
        tag,
        body,
        sealed,
    };
    if let Err(e) = send_towards(sup, dest, req.into_frame()).await {
        control.pending.lock().remove(&tag);
        return Err(e);
    }

    let rsp = match tokio::time::timeout(control.timeout, rx).await {
        Ok(Ok(rsp)) => rsp,
        Ok(Err(_)) => return Err(Error::internal("control correlator dropped")),
        Err(_) => {
            control.pending.lock().remove(&tag);
            return Err(Error::timeout(format!("control request to {}", dest.short())));
        }
    };
    match rsp.status {
        STATUS_OK => {
            let body = control.open_body(&rsp.body, rsp.sealed)?;
            serde_json::from_slice(&body).map_err(metroo_core::Error::from)
        }
        STATUS_NO_KEY => Err(Error::crypto(format!(
            "{} cannot open sealed control requests",
            dest.short()
        ))),
        _ => {
            let detail = String::from_utf8_lossy(&rsp.body).into_owned();
            Err(Error::internal(detail))
        }
    }
}

/// CONTROL_REQ arrived: forward it or serve it.
pub async fn on_request(sup: &Arc<Supervisor>, from: &Arc<PeerLink>, req: ControlReq) {
    if req.dest != sup.agent_id() {
        if let Err(e) = send_towards(sup, req.dest, req.clone().into_frame()).await {
            debug!(dest = %req.dest.short(), error = %e, "control request unroutable");
            let rsp = ControlRsp {
                dest: req.src,
                src: sup.agent_id(),
                tag: req.tag,
                status: STATUS_ERROR,
                body: Bytes::from_static(b"no route"),
                sealed: false,
            };
            respond(sup, from, rsp).await;
        }
        return;
    }

    let control = sup.control();
    let rsp = match control.open_body(&req.body, req.sealed) {
        Ok(raw) => match serde_json::from_slice::<ControlOp>(&raw) {
            Ok(op) => match serve_local(sup, op).await {
                Ok(value) => {
                    let body = serde_json::to_vec(&value).unwrap_or_default();
                    let (body, sealed) = if req.sealed {
                        control.seal_body(&body)
                    } else {
                        (Bytes::from(body), false)
                    };
                    ControlRsp {
                        dest: req.src,
                        src: sup.agent_id(),
                        tag: req.tag,
                        status: STATUS_OK,
                        body,
                        sealed,
                    }
                }
                Err(e) => error_rsp(sup, &req, STATUS_ERROR, &e.to_string()),
            },
            Err(_) => error_rsp(sup, &req, STATUS_ERROR, "unknown control operation"),
        },
        Err(_) => {
            warn!(src = %req.src.short(), "sealed control request but no private key");
            error_rsp(sup, &req, STATUS_NO_KEY, "management key required")
        }
    };
    respond(sup, from, rsp).await;
}

/// CONTROL_RSP arrived: forward it or deliver it to the waiting correlator.
pub async fn on_response(sup: &Arc<Supervisor>, rsp: ControlRsp) {
    if rsp.dest != sup.agent_id() {
        if let Err(e) = send_towards(sup, rsp.dest, rsp.clone().into_frame()).await {
            debug!(dest = %rsp.dest.short(), error = %e, "control response dropped");
        }
        return;
    }
    let waiter = sup.control().pending.lock().remove(&rsp.tag);
    match waiter {
        Some(tx) => {
            let _ = tx.send(rsp);
        }
        None => debug!(tag = rsp.tag, "late control response discarded"),
    }
}

fn error_rsp(sup: &Arc<Supervisor>, req: &ControlReq, status: u8, text: &str) -> ControlRsp {
    ControlRsp {
        dest: req.src,
        src: sup.agent_id(),
        tag: req.tag,
        status,
        body: Bytes::copy_from_slice(text.as_bytes()),
        sealed: false,
    }
}

/// Send a response towards its destination, falling back to the link the
/// request came in on when the RIB has no reverse route yet.
async fn respond(sup: &Arc<Supervisor>, from: &Arc<PeerLink>, rsp: ControlRsp) {
    let frame = rsp.clone().into_frame();
    match send_towards(sup, rsp.dest, frame.clone()).await {
        Ok(()) => {}
        Err(_) => {
            let _ = from.send_frame(frame).await;
        }
    }
}

async fn send_towards(
    sup: &Arc<Supervisor>,
    dest: AgentId,
    frame: metroo_link::Frame,
) -> Result<()> {
    let next_hop = sup
        .router()
        .next_hop_for_agent(dest)
        .ok_or_else(|| Error::no_route(dest.short()))?;
    let link = sup
        .peer(next_hop)
        .ok_or_else(|| Error::no_route(dest.short()))?;
    link.send_frame(frame).await
}

/// Serve one operation against local state.
pub async fn serve_local(sup: &Arc<Supervisor>, op: ControlOp) -> Result<serde_json::Value> {
    let value = match op {
        ControlOp::Status => serde_json::to_value(sup.status())?,
        ControlOp::Peers => serde_json::to_value(sup.peers_snapshot())?,
        ControlOp::Routes => serde_json::to_value(sup.router().snapshot_routes())?,
        ControlOp::NodeInfo => serde_json::to_value(sup.build_node_info())?,
        ControlOp::Advertise => {
            let reached = sup.advertise_now().await;
            serde_json::json!({ "advertised_to": reached })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_op_json_shape() {
        let op: ControlOp = serde_json::from_str(r#"{"op":"status"}"#).unwrap();
        assert_eq!(op, ControlOp::Status);
        assert_eq!(
            serde_json::to_string(&ControlOp::Advertise).unwrap(),
            r#"{"op":"advertise"}"#
        );
    }
}
