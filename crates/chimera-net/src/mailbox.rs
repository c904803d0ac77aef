//! FIFO inboxes for frames a callback should not process inline

use chimera_comm::Message;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Stores messages by type; heavy work moves off the server thread by
/// registering `MailBox::deliverer` as the callback and consuming from an
/// application thread.
pub struct MailBox {
    inboxes: Mutex<HashMap<i32, VecDeque<Message>>>,
}

impl MailBox {
    pub fn new(message_types: impl IntoIterator<Item = i32>) -> Arc<Self> {
        let inboxes = message_types
            .into_iter()
            .map(|t| (t, VecDeque::new()))
            .collect();
        Arc::new(Self {
            inboxes: Mutex::new(inboxes),
        })
    }

    pub fn store(&self, message_type: i32, msg: Message) {
        self.inboxes
            .lock()
            .entry(message_type)
            .or_default()
            .push_back(msg);
    }

    pub fn has_message(&self, message_type: i32) -> bool {
        self.inboxes
            .lock()
            .get(&message_type)
            .is_some_and(|q| !q.is_empty())
    }

    pub fn try_next(&self, message_type: i32) -> Option<Message> {
        self.inboxes.lock().get_mut(&message_type)?.pop_front()
    }

    /// Busy-wait for the next message of a type, backing off 10 µs between
    /// polls.
    pub fn wait(&self, message_type: i32) -> Message {
        loop {
            if let Some(msg) = self.try_next(message_type) {
                return msg;
            }
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    /// A callback that files frames of `message_type` into this mailbox.
    pub fn deliverer(self: &Arc<Self>, message_type: i32) -> impl Fn(Message) + Send + Sync {
        let mailbox = self.clone();
        move |msg| mailbox.store(message_type, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_retrieve_in_order() {
        let mailbox = MailBox::new([5]);
        let mut first = Message::new();
        first.pack(1i32);
        let mut second = Message::new();
        second.pack(2i32);
        mailbox.store(5, first);
        mailbox.store(5, second);
        assert!(mailbox.has_message(5));
        let mut a = mailbox.wait(5);
        let mut b = mailbox.wait(5);
        assert_eq!(a.unpack::<i32>().unwrap(), 1);
        assert_eq!(b.unpack::<i32>().unwrap(), 2);
        assert!(!mailbox.has_message(5));
    }

    #[test]
    fn test_wait_blocks_until_delivery() {
        let mailbox = MailBox::new([9]);
        let sender = mailbox.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            let mut msg = Message::new();
            msg.pack(0.5f64);
            sender.store(9, msg);
        });
        let mut msg = mailbox.wait(9);
        assert_eq!(msg.unpack::<f64>().unwrap(), 0.5);
        handle.join().unwrap();
    }

    #[test]
    fn test_deliverer_files_by_type() {
        let mailbox = MailBox::new([1, 2]);
        let deliver = mailbox.deliverer(2);
        deliver(Message::new());
        assert!(!mailbox.has_message(1));
        assert!(mailbox.has_message(2));
    }
}
