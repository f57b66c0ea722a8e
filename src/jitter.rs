//! Per-channel jitter queue: bounded FIFO of decoded PCM frames, lock-free
//! on the producer side, drop-oldest on overflow.
//!
//! Built directly on the teacher's transport primitive
//! (`crossbeam_channel`), generalized from the teacher's `unbounded()`
//! packet relay to a capacity-checked bounded queue so the MAX_QUEUE_FRAMES
//! invariant is enforced at the queue itself rather than by a separate
//! maintenance pass (the teacher's `BTreeMap`-based peer jitter buffer
//! trims on the consumer side instead — here the producer trims so the
//! mixer consumer never needs to do bookkeeping beyond draining).

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::pcm::PcmFrame;

pub struct JitterQueue {
    tx: Sender<PcmFrame>,
    rx: Receiver<PcmFrame>,
    capacity: usize,
}

impl JitterQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Non-blocking enqueue. On overflow, drops the oldest queued frame
    /// before accepting the new one, returning `true` if an overflow
    /// occurred (the caller increments the per-channel overflow counter).
    pub fn push(&self, frame: PcmFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => false,
            Err(TrySendError::Full(frame)) => {
                // Drop the oldest frame, then retry once. Under a single
                // producer (the receiver thread) this always succeeds.
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(frame);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Non-blocking dequeue, used by the mixer to drain into its
    /// per-channel accumulation buffer.
    pub fn pop(&self) -> Option<PcmFrame> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
