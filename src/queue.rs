//! Bounded blocking FIFO with an explicit, owner-driven close.
//!
//! `crossbeam_channel` closes a channel when the last `Sender` drops. The
//! pipeline's workers both consume and produce, so none of them may keep a
//! long-lived `Sender`: the queue keeps the only one and lends out a clone for
//! the duration of a single push. `close()` drops it, after which receivers
//! drain what is left and then observe disconnection.

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::ArchiverError;

pub struct WorkQueue<T> {
    name: &'static str,
    sender: Mutex<Option<Sender<T>>>,
    receiver: Receiver<T>,
}

/// Outcome of a non-blocking push.
pub enum TryPush<T> {
    Queued,
    Full(T),
}

impl<T> WorkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        WorkQueue { name, sender: Mutex::new(Some(sender)), receiver }
    }

    fn sender(&self) -> Result<Sender<T>, ArchiverError> {
        let guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone().ok_or(ArchiverError::QueueClosed(self.name))
    }

    /// Blocks while the queue is full.
    pub fn push(&self, item: T) -> Result<(), ArchiverError> {
        self.sender()?
            .send(item)
            .map_err(|_| ArchiverError::QueueClosed(self.name))
    }

    pub fn try_push(&self, item: T) -> Result<TryPush<T>, ArchiverError> {
        match self.sender()?.try_send(item) {
            Ok(()) => Ok(TryPush::Queued),
            Err(TrySendError::Full(item)) => Ok(TryPush::Full(item)),
            Err(TrySendError::Disconnected(_)) => Err(ArchiverError::QueueClosed(self.name)),
        }
    }

    /// Blocks while the queue is empty; `None` once closed and drained.
    pub fn pop(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Idempotent.
    pub fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn close_lets_consumers_drain_then_stop() {
        let q = WorkQueue::new("test", 4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.close();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_after_close_is_an_error() {
        let q = WorkQueue::new("scan", 1);
        q.close();
        assert!(matches!(q.push(1), Err(ArchiverError::QueueClosed("scan"))));
        assert!(matches!(q.try_push(1), Err(ArchiverError::QueueClosed("scan"))));
    }

    #[test]
    fn try_push_reports_full_without_blocking() {
        let q = WorkQueue::new("test", 1);
        assert!(matches!(q.try_push(1).unwrap(), TryPush::Queued));
        match q.try_push(2).unwrap() {
            TryPush::Full(item) => assert_eq!(item, 2),
            TryPush::Queued => panic!("queue of capacity 1 accepted two items"),
        }
    }

    #[test]
    fn blocked_consumer_wakes_on_close() {
        let q = WorkQueue::<u32>::new("test", 1);
        thread::scope(|s| {
            let consumer = s.spawn(|| q.pop());
            thread::sleep(std::time::Duration::from_millis(20));
            q.close();
            assert_eq!(consumer.join().unwrap(), None);
        });
    }
}
