//! Completion handles for in-flight non-blocking operations

use crate::error::{CommError, Result};
use crate::message::{pod_from_bytes, Message, Pod};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Poll-state of an in-flight operation, supplied by the transport.
pub trait Completion: Send + Sync {
    fn is_complete(&self) -> bool;
}

struct Immediate;

impl Completion for Immediate {
    fn is_complete(&self) -> bool {
        true
    }
}

/// Handle to an in-flight non-blocking operation.
///
/// `Pending -> Completed`, observed by polling. Cloning shares the same
/// underlying operation.
#[derive(Clone)]
pub struct Status {
    probe: Arc<dyn Completion>,
}

impl Status {
    pub fn new(probe: Arc<dyn Completion>) -> Self {
        Self { probe }
    }

    /// An already-completed operation (buffered local sends).
    pub fn immediate() -> Self {
        Self {
            probe: Arc::new(Immediate),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.probe.is_complete()
    }

    /// Block until complete, polling every 10 microseconds.
    pub fn wait(&self) {
        while !self.is_complete() {
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    /// Block up to `seconds`, polling at 5 millisecond granularity.
    /// Returns whether the operation completed in time.
    pub fn wait_for(&self, seconds: f64) -> bool {
        let step = 5e-3;
        let mut remaining = seconds;
        while remaining > 0.0 {
            if self.is_complete() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
            remaining -= step;
        }
        self.is_complete()
    }
}

/// Block until every handle completes.
pub fn wait_all(statuses: &[Status]) {
    for status in statuses {
        status.wait();
    }
}

/// A non-blocking message send: the handle owns the payload until the
/// transport reports completion, then the holder may reclaim it once.
pub struct Promise {
    status: Status,
    payload: Option<Message>,
}

impl Promise {
    pub fn new(status: Status, payload: Message) -> Self {
        Self {
            status,
            payload: Some(payload),
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn wait(&self) {
        self.status.wait()
    }

    pub fn wait_for(&self, seconds: f64) -> bool {
        self.status.wait_for(seconds)
    }

    /// Wait for completion and take the payload back. A second reclaim
    /// fails: the payload has already been handed off.
    pub fn reclaim(&mut self) -> Result<Message> {
        self.status.wait();
        self.payload.take().ok_or(CommError::UseAfterFree)
    }
}

/// A non-blocking receive; the incoming bytes land in the shared slot when
/// the transport completes the operation.
pub struct RecvHandle {
    status: Status,
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl RecvHandle {
    pub fn new(status: Status, slot: Arc<Mutex<Option<Vec<u8>>>>) -> Self {
        Self { status, slot }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Wait for arrival and take the raw bytes. A second take fails.
    pub fn take_bytes(&mut self) -> Result<Vec<u8>> {
        self.status.wait();
        self.slot.lock().take().ok_or(CommError::UseAfterFree)
    }

    /// Wait for arrival and decode the payload as a pod sequence.
    pub fn take_vec<T: Pod>(&mut self) -> Result<Vec<T>> {
        let bytes = self.take_bytes()?;
        pod_from_bytes(&bytes)
    }
}
