//! chimera-net: asynchronous message routing for overset assembly
//!
//! A per-rank TCP server with typed callbacks decouples logical traffic
//! (mesh fragments, receptor streams) from the collective plane. The main
//! thread enqueues pushes at any time; the single server thread owns all
//! socket state.

pub mod error;
pub mod framing;
pub mod mailbox;
pub mod ports;
pub mod postman;

pub use error::{NetError, Result};
pub use framing::{Frame, MAX_FRAME_BYTES};
pub use mailbox::MailBox;
pub use ports::PortMapper;
pub use postman::{Callback, PostMan, Poster};
