//! In-process transport: one thread per rank, condvar mailboxes
//!
//! The local fabric implements the transport contract for a group of ranks
//! running as threads in a single process. Sends are buffered (they never
//! block), receives block on the destination mailbox, and the group-wide
//! operations (barrier, split, windows) rendezvous through shared state.

use crate::error::{CommError, Result};
use crate::group::ProcessGroup;
use crate::status::{Completion, RecvHandle, Status};
use crate::transport::{ProbeResult, Transport, Window};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Mail {
    queues: HashMap<(usize, i32), VecDeque<Vec<u8>>>,
    arrivals: VecDeque<(usize, i32)>,
}

struct MailSlot {
    inner: Mutex<Mail>,
    cv: Condvar,
}

#[derive(Default)]
struct BarrierState {
    count: usize,
    generation: u64,
}

#[derive(Default)]
struct SplitState {
    colors: Vec<Option<i32>>,
    arrived: usize,
    groups: BTreeMap<i32, (Arc<Shared>, Vec<usize>)>,
    consumed: usize,
}

#[derive(Default)]
struct WindowState {
    buffers: Vec<Option<Arc<Mutex<Vec<u8>>>>>,
    arrived: usize,
    published: Vec<Arc<Mutex<Vec<u8>>>>,
    consumed: usize,
}

struct Shared {
    size: usize,
    mail: Vec<MailSlot>,
    barrier: Mutex<BarrierState>,
    barrier_cv: Condvar,
    ibarrier: Mutex<Vec<u64>>,
    split: Mutex<SplitState>,
    split_cv: Condvar,
    window: Mutex<WindowState>,
    window_cv: Condvar,
    aborted: AtomicBool,
}

impl Shared {
    fn new(size: usize) -> Arc<Self> {
        let mail = (0..size)
            .map(|_| MailSlot {
                inner: Mutex::new(Mail::default()),
                cv: Condvar::new(),
            })
            .collect();
        Arc::new(Self {
            size,
            mail,
            barrier: Mutex::new(BarrierState::default()),
            barrier_cv: Condvar::new(),
            ibarrier: Mutex::new(vec![0; size]),
            split: Mutex::new(SplitState {
                colors: vec![None; size],
                ..SplitState::default()
            }),
            split_cv: Condvar::new(),
            window: Mutex::new(WindowState {
                buffers: vec![None; size],
                ..WindowState::default()
            }),
            window_cv: Condvar::new(),
            aborted: AtomicBool::new(false),
        })
    }

    fn check_alive(&self) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            Err(CommError::Transport("group was aborted".into()))
        } else {
            Ok(())
        }
    }
}

/// One rank's handle onto the in-process fabric.
pub struct LocalFabric {
    shared: Arc<Shared>,
    rank: usize,
}

impl LocalFabric {
    /// Create the fabric for `size` ranks; hand one handle to each thread.
    pub fn create(size: usize) -> Vec<LocalFabric> {
        let shared = Shared::new(size);
        (0..size)
            .map(|rank| LocalFabric {
                shared: shared.clone(),
                rank,
            })
            .collect()
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.shared.size {
            return Err(CommError::Transport(format!(
                "rank {rank} outside group of size {}",
                self.shared.size
            )));
        }
        Ok(())
    }
}

struct IbarrierCompletion {
    shared: Arc<Shared>,
    epoch: u64,
}

impl Completion for IbarrierCompletion {
    fn is_complete(&self) -> bool {
        let arrivals = self.shared.ibarrier.lock();
        arrivals.iter().all(|&count| count >= self.epoch)
    }
}

struct RecvCompletion {
    shared: Arc<Shared>,
    me: usize,
    source: usize,
    tag: i32,
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Completion for RecvCompletion {
    fn is_complete(&self) -> bool {
        if self.slot.lock().is_some() {
            return true;
        }
        let mut mail = self.shared.mail[self.me].inner.lock();
        let key = (self.source, self.tag);
        if let Some(queue) = mail.queues.get_mut(&key) {
            if let Some(bytes) = queue.pop_front() {
                if let Some(pos) = mail.arrivals.iter().position(|&k| k == key) {
                    mail.arrivals.remove(pos);
                }
                *self.slot.lock() = Some(bytes);
                return true;
            }
        }
        false
    }
}

struct LocalWindow {
    buffers: Vec<Arc<Mutex<Vec<u8>>>>,
}

impl LocalWindow {
    fn buffer(&self, rank: usize) -> Result<&Arc<Mutex<Vec<u8>>>> {
        self.buffers.get(rank).ok_or_else(|| {
            CommError::Transport(format!("window access to rank {rank} outside group"))
        })
    }
}

impl Window for LocalWindow {
    fn get(&self, rank: usize, offset: usize, len: usize) -> Result<Vec<u8>> {
        let buffer = self.buffer(rank)?.lock();
        if offset + len > buffer.len() {
            return Err(CommError::OutOfRange {
                offset,
                requested: len,
                available: buffer.len(),
            });
        }
        Ok(buffer[offset..offset + len].to_vec())
    }

    fn put(&self, rank: usize, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut buffer = self.buffer(rank)?.lock();
        if offset + bytes.len() > buffer.len() {
            return Err(CommError::OutOfRange {
                offset,
                requested: bytes.len(),
                available: buffer.len(),
            });
        }
        buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn fetch_add_i64(&self, rank: usize, offset: usize, delta: i64) -> Result<i64> {
        let mut buffer = self.buffer(rank)?.lock();
        if offset + 8 > buffer.len() {
            return Err(CommError::OutOfRange {
                offset,
                requested: 8,
                available: buffer.len(),
            });
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buffer[offset..offset + 8]);
        let previous = i64::from_ne_bytes(raw);
        buffer[offset..offset + 8].copy_from_slice(&(previous + delta).to_ne_bytes());
        Ok(previous)
    }
}

impl Transport for LocalFabric {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn send(&self, bytes: &[u8], dest: usize, tag: i32) -> Result<()> {
        self.shared.check_alive()?;
        self.check_rank(dest)?;
        let slot = &self.shared.mail[dest];
        let mut mail = slot.inner.lock();
        mail.queues
            .entry((self.rank, tag))
            .or_default()
            .push_back(bytes.to_vec());
        mail.arrivals.push_back((self.rank, tag));
        slot.cv.notify_all();
        Ok(())
    }

    fn recv(&self, source: usize, tag: i32) -> Result<Vec<u8>> {
        self.check_rank(source)?;
        let slot = &self.shared.mail[self.rank];
        let key = (source, tag);
        let mut mail = slot.inner.lock();
        loop {
            self.shared.check_alive()?;
            if let Some(bytes) = mail.queues.get_mut(&key).and_then(VecDeque::pop_front) {
                if let Some(pos) = mail.arrivals.iter().position(|&k| k == key) {
                    mail.arrivals.remove(pos);
                }
                return Ok(bytes);
            }
            slot.cv.wait(&mut mail);
        }
    }

    fn recv_any(&self, tag: i32) -> Result<(usize, Vec<u8>)> {
        let slot = &self.shared.mail[self.rank];
        let mut mail = slot.inner.lock();
        loop {
            self.shared.check_alive()?;
            let found = mail
                .arrivals
                .iter()
                .position(|&(_, t)| t == tag)
                .map(|pos| (pos, mail.arrivals[pos]));
            if let Some((pos, key)) = found {
                mail.arrivals.remove(pos);
                let bytes = mail
                    .queues
                    .get_mut(&key)
                    .and_then(VecDeque::pop_front)
                    .ok_or_else(|| {
                        CommError::Invariant("arrival record without a queued message".into())
                    })?;
                return Ok((key.0, bytes));
            }
            slot.cv.wait(&mut mail);
        }
    }

    fn probe(&self) -> Result<ProbeResult> {
        let slot = &self.shared.mail[self.rank];
        let mut mail = slot.inner.lock();
        loop {
            self.shared.check_alive()?;
            if let Some(&key) = mail.arrivals.front() {
                let bytes = mail
                    .queues
                    .get(&key)
                    .and_then(|q| q.front())
                    .map(Vec::len)
                    .ok_or_else(|| {
                        CommError::Invariant("arrival record without a queued message".into())
                    })?;
                return Ok(ProbeResult {
                    source: key.0,
                    tag: key.1,
                    bytes,
                });
            }
            slot.cv.wait(&mut mail);
        }
    }

    fn isend(&self, bytes: Vec<u8>, dest: usize, tag: i32) -> Result<Status> {
        // local sends are buffered, so delivery completes eagerly
        self.send(&bytes, dest, tag)?;
        Ok(Status::immediate())
    }

    fn irecv(&self, source: usize, tag: i32) -> Result<RecvHandle> {
        self.check_rank(source)?;
        let slot = Arc::new(Mutex::new(None));
        let probe = Arc::new(RecvCompletion {
            shared: self.shared.clone(),
            me: self.rank,
            source,
            tag,
            slot: slot.clone(),
        });
        Ok(RecvHandle::new(Status::new(probe), slot))
    }

    fn barrier(&self) -> Result<()> {
        self.shared.check_alive()?;
        let mut state = self.shared.barrier.lock();
        let generation = state.generation;
        state.count += 1;
        if state.count == self.shared.size {
            state.count = 0;
            state.generation += 1;
            self.shared.barrier_cv.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            self.shared.barrier_cv.wait(&mut state);
            self.shared.check_alive()?;
        }
        Ok(())
    }

    fn ibarrier(&self) -> Result<Status> {
        self.shared.check_alive()?;
        let epoch = {
            let mut arrivals = self.shared.ibarrier.lock();
            arrivals[self.rank] += 1;
            arrivals[self.rank]
        };
        Ok(Status::new(Arc::new(IbarrierCompletion {
            shared: self.shared.clone(),
            epoch,
        })))
    }

    fn abort(&self, code: i32) {
        tracing::error!(code, "aborting local group");
        self.shared.aborted.store(true, Ordering::SeqCst);
        for slot in &self.shared.mail {
            slot.cv.notify_all();
        }
        self.shared.barrier_cv.notify_all();
        self.shared.split_cv.notify_all();
        self.shared.window_cv.notify_all();
    }

    fn split(&self, color: i32) -> Result<Arc<dyn Transport>> {
        self.shared.check_alive()?;
        let mut state = self.shared.split.lock();
        // a previous rendezvous must drain before a new one may begin
        while state.arrived == self.shared.size {
            self.shared.split_cv.wait(&mut state);
            self.shared.check_alive()?;
        }
        state.colors[self.rank] = Some(color);
        state.arrived += 1;
        if state.arrived == self.shared.size {
            let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
            for (rank, &c) in state.colors.iter().enumerate() {
                let c = c.ok_or_else(|| {
                    CommError::Invariant("split rendezvous missing a color".into())
                })?;
                members.entry(c).or_default().push(rank);
            }
            state.groups = members
                .into_iter()
                .map(|(c, ranks)| {
                    let shared = Shared::new(ranks.len());
                    (c, (shared, ranks))
                })
                .collect();
            self.shared.split_cv.notify_all();
        } else {
            while state.arrived < self.shared.size {
                self.shared.split_cv.wait(&mut state);
                self.shared.check_alive()?;
            }
        }
        let (group_shared, ranks) = state
            .groups
            .get(&color)
            .cloned()
            .ok_or_else(|| CommError::Invariant("split rendezvous lost a color group".into()))?;
        let new_rank = ranks
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| CommError::Invariant("rank missing from its split group".into()))?;
        state.consumed += 1;
        if state.consumed == self.shared.size {
            *state = SplitState {
                colors: vec![None; self.shared.size],
                ..SplitState::default()
            };
            self.shared.split_cv.notify_all();
        }
        Ok(Arc::new(LocalFabric {
            shared: group_shared,
            rank: new_rank,
        }))
    }

    fn create_window(&self, local: Vec<u8>) -> Result<Arc<dyn Window>> {
        self.shared.check_alive()?;
        let mut state = self.shared.window.lock();
        // a previous rendezvous must drain before a new one may begin
        while state.arrived == self.shared.size {
            self.shared.window_cv.wait(&mut state);
            self.shared.check_alive()?;
        }
        state.buffers[self.rank] = Some(Arc::new(Mutex::new(local)));
        state.arrived += 1;
        if state.arrived == self.shared.size {
            state.published = state
                .buffers
                .iter()
                .map(|b| {
                    b.clone().ok_or_else(|| {
                        CommError::Invariant("window rendezvous missing a buffer".into())
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.shared.window_cv.notify_all();
        } else {
            while state.arrived < self.shared.size {
                self.shared.window_cv.wait(&mut state);
                self.shared.check_alive()?;
            }
        }
        let window = Arc::new(LocalWindow {
            buffers: state.published.clone(),
        });
        state.consumed += 1;
        if state.consumed == self.shared.size {
            *state = WindowState {
                buffers: vec![None; self.shared.size],
                ..WindowState::default()
            };
            self.shared.window_cv.notify_all();
        }
        Ok(window)
    }
}

/// Run `body` on `size` ranks, one thread each, over a fresh local fabric.
/// Panics in any rank propagate to the caller, which makes this the test
/// harness for every multi-rank scenario.
pub fn spawn_group<F>(size: usize, body: F)
where
    F: Fn(ProcessGroup) + Send + Sync,
{
    let fabrics = LocalFabric::create(size);
    std::thread::scope(|scope| {
        for fabric in fabrics {
            let body = &body;
            scope.spawn(move || body(ProcessGroup::new(Arc::new(fabric))));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_recv_between_two_ranks() {
        spawn_group(2, |group| {
            let t = group.transport();
            if t.rank() == 0 {
                t.send(&[1, 2, 3], 1, 0).unwrap();
            } else {
                assert_eq!(t.recv(0, 0).unwrap(), vec![1, 2, 3]);
            }
        });
    }

    #[test]
    fn test_probe_reports_source_and_size() {
        spawn_group(2, |group| {
            let t = group.transport();
            if t.rank() == 0 {
                t.send(&[9u8; 17], 1, 5).unwrap();
            } else {
                let probe = t.probe().unwrap();
                assert_eq!(probe.source, 0);
                assert_eq!(probe.tag, 5);
                assert_eq!(probe.bytes, 17);
                t.recv(probe.source, probe.tag).unwrap();
            }
        });
    }

    #[test]
    fn test_ibarrier_completes_only_when_all_arrive() {
        spawn_group(3, |group| {
            let t = group.transport();
            let status = t.ibarrier().unwrap();
            assert!(status.wait_for(5.0));
        });
    }

    #[test]
    fn test_split_by_parity() {
        spawn_group(4, |group| {
            let t = group.transport();
            let color = (t.rank() % 2) as i32;
            let sub = t.split(color).unwrap();
            assert_eq!(sub.size(), 2);
            assert_eq!(sub.rank(), t.rank() / 2);
        });
    }

    #[test]
    fn test_window_fetch_add() {
        spawn_group(3, |group| {
            let t = group.transport();
            let window = t.create_window(vec![0u8; 8]).unwrap();
            window.fetch_add_i64(0, 0, 1).unwrap();
            t.barrier().unwrap();
            let raw = window.get(0, 0, 8).unwrap();
            let total = i64::from_ne_bytes(raw.try_into().unwrap());
            assert_eq!(total, 3);
        });
    }

    #[test]
    fn test_irecv_completes_on_arrival() {
        spawn_group(2, |group| {
            let t = group.transport();
            if t.rank() == 0 {
                let mut handle = t.irecv(1, 3).unwrap();
                assert_eq!(handle.take_bytes().unwrap(), vec![4, 5]);
            } else {
                t.send(&[4, 5], 0, 3).unwrap();
            }
        });
    }
}
