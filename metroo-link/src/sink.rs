//! The single path onto a link's wire. Every outbound frame passes a bounded
//! queue (frame count and aggregate bytes); the writer task drains it in
//! order, so frames on one link are strict FIFO across all streams. A sender
//! blocked longer than the stall deadline resets the link.

use crate::frame::Frame;
use metroo_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub(crate) struct FrameSink {
    tx: mpsc::Sender<Frame>,
    bytes: Arc<Semaphore>,
    stall: Duration,
    fatal: CancellationToken,
}

pub(crate) struct SinkDrain {
    pub rx: mpsc::Receiver<Frame>,
    pub bytes: Arc<Semaphore>,
}

impl FrameSink {
    pub fn new(
        queue_frames: usize,
        queue_bytes: usize,
        stall: Duration,
        fatal: CancellationToken,
    ) -> (Self, SinkDrain) {
        let (tx, rx) = mpsc::channel(queue_frames);
        let bytes = Arc::new(Semaphore::new(queue_bytes));
        (
            Self {
                tx,
                bytes: bytes.clone(),
                stall,
                fatal,
            },
            SinkDrain { rx, bytes },
        )
    }

    /// Enqueue a frame, blocking on backpressure. Exceeding the stall
    /// deadline is fatal to the whole link.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.fatal.is_cancelled() {
            return Err(Error::transport("link closed"));
        }
        let size = frame.wire_size() as u32;
        let enqueue = async {
            let permit = self
                .bytes
                .clone()
                .acquire_many_owned(size)
                .await
                .map_err(|_| Error::transport("link closed"))?;
            self.tx
                .send(frame)
                .await
                .map_err(|_| Error::transport("link closed"))?;
            // The writer returns the bytes once the frame hits the wire.
            permit.forget();
            Ok(())
        };
        match tokio::time::timeout(self.stall, enqueue).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("send queue stalled for {:?}, resetting link", self.stall);
                self.fatal.cancel();
                Err(Error::timeout("link send queue stalled"))
            }
        }
    }

    /// Best-effort enqueue for shutdown paths; never blocks.
    pub fn try_send(&self, frame: Frame) -> bool {
        if self.fatal.is_cancelled() {
            return false;
        }
        let size = frame.wire_size() as u32;
        let Ok(permit) = self.bytes.clone().try_acquire_many_owned(size) else {
            return false;
        };
        if self.tx.try_send(frame).is_ok() {
            permit.forget();
            true
        } else {
            false
        }
    }
}
