//! chimera-comm: serialization buffer and message-passing facade
//!
//! The foundation of the toolbox: an append-only binary buffer with a typed
//! read cursor, a group-oriented transport contract, an in-process transport
//! for running many ranks as threads, and the `ProcessGroup` facade carrying
//! point-to-point traffic, collectives, reductions, all-to-all exchange, and
//! load balancing.

pub mod error;
pub mod group;
pub mod linear;
pub mod local;
pub mod message;
pub mod status;
pub mod transport;

mod collectives;
mod exchange;
mod reductions;

pub use error::{narrow_to_i32, CommError, Result};
pub use group::ProcessGroup;
pub use message::{pod_bytes, pod_from_bytes, Message, Pod};
pub use status::{wait_all, Completion, Promise, RecvHandle, Status};
pub use transport::{ProbeResult, Transport, Window};
