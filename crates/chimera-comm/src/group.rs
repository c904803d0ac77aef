//! Process-group facade: typed operations over a group transport

use crate::error::{CommError, Result};
use crate::message::{pod_bytes, pod_from_bytes, Message, Pod};
use crate::status::{Promise, RecvHandle, Status};
use crate::transport::{ProbeResult, Transport, Window};
use std::sync::Arc;

/// Tag used for all facade-level point-to-point traffic.
pub(crate) const TAG_P2P: i32 = 0;

/// A communicator plus this rank's index and the group size.
///
/// All collective operations are cooperative: every rank of the group must
/// call them in the same order or the group deadlocks.
#[derive(Clone)]
pub struct ProcessGroup {
    transport: Arc<dyn Transport>,
}

impl ProcessGroup {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Tear the whole group down.
    pub fn abort(&self, code: i32) {
        self.transport.abort(code);
    }

    /// Split into sub-groups by color; the sub-group communicator is new
    /// and must be dropped by every member.
    pub fn split(&self, color: i32) -> Result<ProcessGroup> {
        Ok(ProcessGroup::new(self.transport.split(color)?))
    }

    /// Collective: expose `local` for one-sided get/put by the whole group.
    pub fn create_window(&self, local: Vec<u8>) -> Result<Arc<dyn Window>> {
        self.transport.create_window(local)
    }

    pub fn barrier(&self) -> Result<()> {
        self.transport.barrier()
    }

    pub fn nonblocking_barrier(&self) -> Result<Status> {
        self.transport.ibarrier()
    }

    /// Start a non-blocking barrier and abort the group if it does not
    /// complete within the deadline. The only operation that aborts on
    /// timeout.
    pub fn abort_if_not_phoned_home(&self, seconds: f64) -> Result<()> {
        let status = self.nonblocking_barrier()?;
        if status.wait_for(seconds) {
            return Ok(());
        }
        tracing::error!(seconds, "a rank did not phone home in time, aborting");
        self.abort(1337);
        Err(CommError::Transport(format!(
            "rank {} gave up waiting after {seconds} seconds",
            self.rank()
        )))
    }

    // --- point-to-point ---

    pub fn send<T: Pod>(&self, value: T, dest: usize) -> Result<()> {
        self.transport
            .send(&pod_bytes(std::slice::from_ref(&value)), dest, TAG_P2P)
    }

    pub fn recv<T: Pod>(&self, source: usize) -> Result<T> {
        let bytes = self.transport.recv(source, TAG_P2P)?;
        if bytes.len() != T::SIZE {
            return Err(CommError::Invariant(format!(
                "expected a {}-byte scalar, received {} bytes",
                T::SIZE,
                bytes.len()
            )));
        }
        Ok(T::read_from(&bytes))
    }

    /// Receive a scalar from whichever rank sends first.
    pub fn recv_any<T: Pod>(&self) -> Result<(usize, T)> {
        let (source, bytes) = self.transport.recv_any(TAG_P2P)?;
        if bytes.len() != T::SIZE {
            return Err(CommError::Invariant(format!(
                "expected a {}-byte scalar, received {} bytes",
                T::SIZE,
                bytes.len()
            )));
        }
        Ok((source, T::read_from(&bytes)))
    }

    pub fn send_vec<T: Pod>(&self, values: &[T], dest: usize) -> Result<()> {
        self.transport.send(&pod_bytes(values), dest, TAG_P2P)
    }

    /// Receive a sequence whose length is fixed by the message itself; a
    /// probe is unnecessary because the transport delivers whole messages.
    pub fn recv_vec<T: Pod>(&self, source: usize) -> Result<Vec<T>> {
        pod_from_bytes(&self.transport.recv(source, TAG_P2P)?)
    }

    pub fn send_message(&self, msg: &Message, dest: usize) -> Result<()> {
        self.transport.send(msg.as_bytes(), dest, TAG_P2P)
    }

    pub fn recv_message(&self, source: usize) -> Result<Message> {
        Ok(Message::from_bytes(self.transport.recv(source, TAG_P2P)?))
    }

    /// Block until any message is pending and describe it.
    pub fn probe(&self) -> Result<ProbeResult> {
        self.transport.probe()
    }

    // --- non-blocking point-to-point ---

    pub fn nonblocking_send_vec<T: Pod>(&self, values: Vec<T>, dest: usize) -> Result<Status> {
        self.transport.isend(pod_bytes(&values), dest, TAG_P2P)
    }

    /// The returned promise owns the message until the transport reports
    /// completion; the caller reclaims it afterwards.
    pub fn nonblocking_send_message(&self, msg: Message, dest: usize) -> Result<Promise> {
        let status = self
            .transport
            .isend(msg.as_bytes().to_vec(), dest, TAG_P2P)?;
        Ok(Promise::new(status, msg))
    }

    pub fn nonblocking_recv(&self, source: usize) -> Result<RecvHandle> {
        self.transport.irecv(source, TAG_P2P)
    }
}
