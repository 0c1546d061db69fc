// Commit-extent handoff from producers to the output worker

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::input::InputBuffer;

/// A newly published region of one ring: `[consumer cursor, commit_end)`.
///
/// A `None` buffer is the shutdown sentinel. Carrying the ring by `Arc`
/// keeps it alive until every queued extent referencing it has drained.
pub(crate) struct CommitExtent {
    pub buffer: Option<Arc<InputBuffer>>,
    pub commit_end: usize,
}

/// Bounded lock-free queue carrying commit extents; any number of
/// producers push, only the output worker pops.
pub(crate) struct SharedInputQueue {
    inner: ArrayQueue<CommitExtent>,
}

impl SharedInputQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "queue capacity must be a power of two"
        );
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Non-blocking push; gives the extent back when the queue is full.
    #[inline]
    pub fn push(&self, extent: CommitExtent) -> Result<(), CommitExtent> {
        self.inner.push(extent)
    }

    /// Non-blocking pop.
    #[inline]
    pub fn pop(&self) -> Option<CommitExtent> {
        self.inner.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel(commit_end: usize) -> CommitExtent {
        CommitExtent {
            buffer: None,
            commit_end,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = SharedInputQueue::with_capacity(4);
        queue.push(sentinel(1)).ok().unwrap();
        queue.push(sentinel(2)).ok().unwrap();
        assert_eq!(queue.pop().unwrap().commit_end, 1);
        assert_eq!(queue.pop().unwrap().commit_end, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_full_queue_returns_the_extent() {
        let queue = SharedInputQueue::with_capacity(2);
        queue.push(sentinel(1)).ok().unwrap();
        queue.push(sentinel(2)).ok().unwrap();
        let rejected = queue.push(sentinel(3)).err().unwrap();
        assert_eq!(rejected.commit_end, 3);

        // Popping makes room again.
        queue.pop().unwrap();
        queue.push(rejected).ok().unwrap();
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_capacity_must_be_power_of_two() {
        SharedInputQueue::with_capacity(3);
    }

    #[test]
    fn test_is_empty() {
        let queue = SharedInputQueue::with_capacity(2);
        assert!(queue.is_empty());
        queue.push(sentinel(0)).ok().unwrap();
        assert!(!queue.is_empty());
    }
}
