//! Receptor collection at the owning rank

use crate::receptor::Receptor;
use chimera_comm::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Accumulates receptor streams arriving over the router. Delivery counting
/// is deterministic: every peer sends exactly one receptor frame, so the
/// owner knows how many deliveries to await.
#[derive(Default)]
pub struct DonorCollector {
    receptors: Mutex<Vec<Receptor>>,
    deliveries: AtomicUsize,
}

impl DonorCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn store(&self, update: Vec<Receptor>) {
        self.receptors.lock().extend(update);
        self.deliveries.fetch_add(1, Ordering::SeqCst);
    }

    /// Router callback unpacking a receptor frame.
    pub fn callback(self: &Arc<Self>) -> impl Fn(Message) + Send + Sync {
        let collector = self.clone();
        move |mut msg| match Receptor::unpack_list(&mut msg) {
            Ok(update) => collector.store(update),
            Err(e) => warn!("dropping malformed receptor frame: {e}"),
        }
    }

    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Block until `expected` frames have arrived, polling every 10 µs.
    pub fn wait_for_deliveries(&self, expected: usize) {
        while self.deliveries() < expected {
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    pub fn take_receptors(&self) -> Vec<Receptor> {
        std::mem::take(&mut self.receptors.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receptor::CandidateDonor;

    fn receptor(gid: i64) -> Receptor {
        Receptor {
            gid,
            owner: 0,
            distance: 1.0,
            candidates: vec![CandidateDonor {
                component: 0,
                cell_gid: 1,
                cell_owner: 0,
                valid: true,
                distance: 0.5,
                corners: 4,
                donor_node_gids: vec![0, 1, 2, 3],
                weights: vec![0.25; 4],
            }],
        }
    }

    #[test]
    fn test_collector_accumulates_updates() {
        let collector = DonorCollector::new();
        collector.store(vec![receptor(1), receptor(2)]);
        collector.store(vec![receptor(3)]);
        assert_eq!(collector.deliveries(), 2);
        let receptors = collector.take_receptors();
        assert_eq!(receptors.len(), 3);
        assert!(collector.take_receptors().is_empty());
    }

    #[test]
    fn test_callback_unpacks_frames() {
        let collector = DonorCollector::new();
        let callback = collector.callback();
        let mut msg = Message::new();
        Receptor::pack_list(&[receptor(7)], &mut msg);
        msg.finalize();
        callback(msg);
        collector.wait_for_deliveries(1);
        assert_eq!(collector.take_receptors()[0].gid, 7);
    }
}
