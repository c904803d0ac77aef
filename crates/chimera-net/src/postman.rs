//! Per-rank cooperative message router
//!
//! One server thread per rank alternates between draining an inbound frame
//! and sending one outbound frame from the FIFO outbox, sleeping 10 µs when
//! idle. Senders open a connection per message. Ports are OS-assigned and
//! gathered once through the collective plane at construction, so every
//! rank knows every peer's port before any traffic flows.

use crate::error::{NetError, Result};
use crate::framing::Frame;
use chimera_comm::{Message, ProcessGroup};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

pub type Callback = Arc<dyn Fn(Message) + Send + Sync>;

struct Outbound {
    target: usize,
    frame: Frame,
}

struct Core {
    rank: usize,
    hosts: Vec<String>,
    ports: Vec<u16>,
    outbox: Mutex<VecDeque<Outbound>>,
    /// Frozen at start(); dispatching clones the Arc and releases the lock
    /// before invoking, so callbacks may push without deadlocking.
    dispatch: Mutex<Option<Arc<HashMap<i32, Callback>>>>,
    running: AtomicBool,
    live: AtomicBool,
}

impl Core {
    fn dispatch_table(&self) -> Result<Arc<HashMap<i32, Callback>>> {
        self.dispatch.lock().clone().ok_or_else(|| {
            NetError::Configuration("postman traffic before start()".into())
        })
    }

    fn deliver(&self, message_type: i32, body: Vec<u8>) -> Result<()> {
        let table = self.dispatch_table()?;
        match table.get(&message_type) {
            Some(callback) => {
                let mut msg = Message::from_bytes(body);
                msg.finalize();
                callback(msg);
                Ok(())
            }
            None => {
                warn!(message_type, "no handler for message type");
                Ok(())
            }
        }
    }

    fn push(&self, target: usize, frame: Frame) -> Result<()> {
        if target >= self.ports.len() {
            return Err(NetError::Configuration(format!(
                "push target {target} outside group of {} ranks",
                self.ports.len()
            )));
        }
        if target == self.rank && !frame.forward {
            return self.deliver(frame.message_type, frame.body);
        }
        self.outbox.lock().push_back(Outbound { target, frame });
        Ok(())
    }

    fn send_one(&self, out: Outbound) {
        let address = (self.hosts[out.target].as_str(), self.ports[out.target]);
        match TcpStream::connect(address) {
            Ok(mut stream) => {
                if let Err(e) = out.frame.write_to(&mut stream) {
                    error!(dest = out.target, "failed to send frame: {e}");
                }
            }
            Err(e) => {
                error!(dest = out.target, "failed to connect: {e}");
            }
        }
    }
}

/// The router for one rank. Register every expected callback, then
/// `start()`; `push` routes by rank and delivers self-traffic synchronously.
pub struct PostMan {
    core: Arc<Core>,
    expected_types: BTreeSet<i32>,
    pending: HashMap<i32, Callback>,
    listener: Option<TcpListener>,
    server: Option<JoinHandle<()>>,
}

/// Cheap handle for pushing from callbacks and worker threads.
#[derive(Clone)]
pub struct Poster {
    core: Arc<Core>,
}

impl Poster {
    pub fn push(&self, target: usize, message_type: i32, msg: Message) -> Result<()> {
        self.core.push(target, Frame::new(message_type, msg.into_bytes()))
    }

    /// Route a frame through `via`; the intermediate server re-queues it to
    /// `target` without invoking any callback.
    pub fn push_via(
        &self,
        via: usize,
        target: usize,
        message_type: i32,
        msg: Message,
    ) -> Result<()> {
        self.core.push(
            via,
            Frame::forwarded(target as i32, message_type, msg.into_bytes()),
        )
    }

    pub fn rank(&self) -> usize {
        self.core.rank
    }
}

impl PostMan {
    /// Bind an OS-assigned port and gather the group's port list. This is a
    /// collective call.
    pub fn new(group: &ProcessGroup, expected_types: BTreeSet<i32>) -> Result<PostMan> {
        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let ports: Vec<u16> = group
            .gather(port as i32)?
            .into_iter()
            .map(|p| p as u16)
            .collect();
        debug!(rank = group.rank(), port, "postman bound");
        let core = Arc::new(Core {
            rank: group.rank(),
            hosts: vec!["127.0.0.1".to_string(); ports.len()],
            ports,
            outbox: Mutex::new(VecDeque::new()),
            dispatch: Mutex::new(None),
            running: AtomicBool::new(false),
            live: AtomicBool::new(false),
        });
        Ok(PostMan {
            core,
            expected_types,
            pending: HashMap::new(),
            listener: Some(listener),
            server: None,
        })
    }

    /// Override the per-rank connect hosts for multi-host deployments; the
    /// default is loopback everywhere.
    pub fn set_hosts(&mut self, hosts: Vec<String>) -> Result<()> {
        if hosts.len() != self.core.ports.len() {
            return Err(NetError::Configuration(format!(
                "{} hosts for {} ranks",
                hosts.len(),
                self.core.ports.len()
            )));
        }
        // hosts are only read by the server thread, which does not exist yet
        if self.server.is_some() {
            return Err(NetError::Configuration(
                "hosts must be set before start()".into(),
            ));
        }
        Arc::get_mut(&mut self.core)
            .ok_or_else(|| NetError::Configuration("postman already shared".into()))?
            .hosts = hosts;
        Ok(())
    }

    /// Bind a callback to a message type; all expected types must be bound
    /// before `start()`.
    pub fn register_callback(
        &mut self,
        message_type: i32,
        callback: impl Fn(Message) + Send + Sync + 'static,
    ) {
        self.pending.insert(message_type, Arc::new(callback));
    }

    pub fn poster(&self) -> Poster {
        Poster {
            core: self.core.clone(),
        }
    }

    pub fn push(&self, target: usize, message_type: i32, msg: Message) -> Result<()> {
        self.core
            .push(target, Frame::new(message_type, msg.into_bytes()))
    }

    pub fn push_via(
        &self,
        via: usize,
        target: usize,
        message_type: i32,
        msg: Message,
    ) -> Result<()> {
        self.core.push(
            via,
            Frame::forwarded(target as i32, message_type, msg.into_bytes()),
        )
    }

    /// Outbound frames not yet handed to the OS; drain to zero before any
    /// barrier that precedes `stop()`.
    pub fn pending_outbound(&self) -> usize {
        self.core.outbox.lock().len()
    }

    pub fn start(&mut self) -> Result<()> {
        for &message_type in &self.expected_types {
            if !self.pending.contains_key(&message_type) {
                return Err(NetError::Configuration(format!(
                    "message type {message_type} has no callback registered"
                )));
            }
        }
        let listener = self.listener.take().ok_or_else(|| {
            NetError::Configuration("postman already started".into())
        })?;
        *self.core.dispatch.lock() = Some(Arc::new(self.pending.clone()));
        self.core.running.store(true, Ordering::SeqCst);
        let core = self.core.clone();
        self.server = Some(std::thread::spawn(move || serve(core, listener)));
        while !self.core.live.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_micros(10));
        }
        Ok(())
    }

    /// Cooperative shutdown: the server thread exits between poll cycles;
    /// in-flight inbound frames are dropped and the outbox is discarded.
    pub fn stop(&mut self) {
        if self.server.is_none() {
            return;
        }
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.server.take() {
            if handle.join().is_err() {
                error!("postman server thread panicked");
            }
        }
        self.core.outbox.lock().clear();
    }
}

impl Drop for PostMan {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(core: Arc<Core>, listener: TcpListener) {
    core.live.store(true, Ordering::SeqCst);
    while core.running.load(Ordering::SeqCst) {
        let mut worked = false;

        match listener.accept() {
            Ok((stream, _)) => {
                worked = true;
                if let Err(e) = handle_inbound(&core, stream) {
                    warn!("inbound frame failed: {e}");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }

        let next = core.outbox.lock().pop_front();
        if let Some(out) = next {
            worked = true;
            core.send_one(out);
        }

        if !worked {
            std::thread::sleep(Duration::from_micros(10));
        }
    }
    core.live.store(false, Ordering::SeqCst);
}

fn handle_inbound(core: &Arc<Core>, stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut stream = stream;
    let frame = Frame::read_from(&mut stream)?;
    if frame.forward {
        // server-side shortcut: re-queue without invoking any callback
        let target = frame.forward_rank as usize;
        debug!(dest = target, message_type = frame.message_type, "forwarding frame");
        core.push(target, Frame::new(frame.message_type, frame.body))?;
    } else {
        core.deliver(frame.message_type, frame.body)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MailBox;
    use chimera_comm::local::spawn_group;

    #[test]
    fn test_start_requires_all_callbacks() {
        spawn_group(1, |group| {
            let mut postman = PostMan::new(&group, BTreeSet::from([0, 42, 98])).unwrap();
            postman.register_callback(0, |_| {});
            let err = postman.start().unwrap_err();
            assert!(matches!(err, NetError::Configuration(_)));
        });
    }

    #[test]
    fn test_self_push_is_synchronous() {
        spawn_group(1, |group| {
            let mailbox = MailBox::new([7]);
            let mut postman = PostMan::new(&group, BTreeSet::from([7])).unwrap();
            postman.register_callback(7, mailbox.deliverer(7));
            postman.start().unwrap();

            let mut msg = Message::new();
            msg.pack(0.987f64);
            postman.push(0, 7, msg).unwrap();
            // self-delivery happens inside push
            let mut got = mailbox.try_next(7).unwrap();
            assert_eq!(got.unpack::<f64>().unwrap(), 0.987);
            postman.stop();
        });
    }

    #[test]
    fn test_round_trip_with_reply_callback() {
        spawn_group(2, |group| {
            let mailbox = MailBox::new([0, 42]);
            let mut postman = PostMan::new(&group, BTreeSet::from([0, 42, 98])).unwrap();
            let poster = postman.poster();
            // type 98 adds three and replies to the packed sender rank
            postman.register_callback(98, move |mut body: Message| {
                let sender = body.unpack::<i32>().unwrap() as usize;
                let n = body.unpack::<i32>().unwrap();
                let mut reply = Message::new();
                reply.pack(n + 3);
                poster.push(sender, 0, reply).unwrap();
            });
            postman.register_callback(0, mailbox.deliverer(0));
            postman.register_callback(42, mailbox.deliverer(42));
            postman.start().unwrap();

            let peer = 1 - group.rank();
            let mut msg = Message::new();
            msg.pack(group.rank() as i32);
            msg.pack(7i32);
            postman.push(peer, 98, msg).unwrap();

            let mut msg = Message::new();
            msg.pack(0.987f64);
            postman.push(peer, 42, msg).unwrap();

            let mut reply = mailbox.wait(0);
            assert_eq!(reply.unpack::<i32>().unwrap(), 10);
            let mut direct = mailbox.wait(42);
            assert_eq!(direct.unpack::<f64>().unwrap(), 0.987);

            group.barrier().unwrap();
            postman.stop();
        });
    }

    #[test]
    fn test_forwarding_skips_intermediate_callbacks() {
        spawn_group(3, |group| {
            let mailbox = MailBox::new([5]);
            let mut postman = PostMan::new(&group, BTreeSet::from([5])).unwrap();
            postman.register_callback(5, mailbox.deliverer(5));
            postman.start().unwrap();

            if group.rank() == 0 {
                // route to rank 2 through rank 1
                let mut msg = Message::new();
                msg.pack(123i64);
                postman.push_via(1, 2, 5, msg).unwrap();
            }
            if group.rank() == 2 {
                let mut got = mailbox.wait(5);
                assert_eq!(got.unpack::<i64>().unwrap(), 123);
            }
            group.barrier().unwrap();
            // rank 1's callback never fired
            if group.rank() == 1 {
                assert!(!mailbox.has_message(5));
            }
            postman.stop();
        });
    }

    #[test]
    fn test_fifo_per_source_and_type() {
        spawn_group(2, |group| {
            let mailbox = MailBox::new([3]);
            let mut postman = PostMan::new(&group, BTreeSet::from([3])).unwrap();
            postman.register_callback(3, mailbox.deliverer(3));
            postman.start().unwrap();

            let peer = 1 - group.rank();
            for i in 0..20i32 {
                let mut msg = Message::new();
                msg.pack(i);
                postman.push(peer, 3, msg).unwrap();
            }
            for i in 0..20i32 {
                let mut got = mailbox.wait(3);
                assert_eq!(got.unpack::<i32>().unwrap(), i);
            }
            group.barrier().unwrap();
            postman.stop();
        });
    }
}
