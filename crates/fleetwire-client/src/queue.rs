//! Outbound queue between the producers and the writer.

use crossbeam_queue::ArrayQueue;

use crate::cancel::CancelToken;

/// Bounded multi-producer queue feeding the session's writer thread.
///
/// A full queue is backpressure, not an error: the pusher spins with a
/// yield until the writer frees a slot, so each producer's frames stay
/// in production order. Cancellation breaks the spin and the frame is
/// dropped.
#[derive(Debug)]
pub struct SendQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> SendQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "send queue needs room for at least one frame");
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Pushes `item`, spinning while the queue is full. Returns `false`
    /// if `cancel` fired before a slot opened; the item is dropped.
    pub fn push_or_drop(&self, item: T, cancel: &CancelToken) -> bool {
        let mut item = item;
        loop {
            match self.inner.push(item) {
                Ok(()) => return true,
                Err(back) => {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    item = back;
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Pops the oldest frame, if any. The writer's side of the queue.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn frames_come_out_in_production_order() {
        let q = SendQueue::new(4);
        let cancel = CancelToken::new();
        for i in 0..4 {
            assert!(q.push_or_drop(i, &cancel));
        }
        for i in 0..4 {
            assert_eq!(q.try_pop(), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_spins_until_the_writer_drains() {
        let q = Arc::new(SendQueue::new(1));
        let cancel = Arc::new(CancelToken::new());
        assert!(q.push_or_drop(0, &cancel));

        let pusher = thread::spawn({
            let q = Arc::clone(&q);
            let cancel = Arc::clone(&cancel);
            move || q.push_or_drop(1, &cancel)
        });
        // Free the slot the pusher is spinning on.
        loop {
            if q.try_pop().is_some() {
                break;
            }
            thread::yield_now();
        }
        assert!(pusher.join().expect("pusher"));
        assert_eq!(q.try_pop(), Some(1));
    }

    #[test]
    fn cancellation_drops_instead_of_wedging() {
        let q = SendQueue::new(1);
        let cancel = CancelToken::new();
        assert!(q.push_or_drop(7, &cancel));
        cancel.cancel();
        assert!(!q.push_or_drop(8, &cancel));
        // The queued frame survives; only the new one was dropped.
        assert_eq!(q.try_pop(), Some(7));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    #[should_panic(expected = "at least one frame")]
    fn zero_capacity_is_rejected() {
        let _q: SendQueue<u8> = SendQueue::new(0);
    }
}
