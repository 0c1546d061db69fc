// The per-producer input ring
//
// One producer (the owning thread) allocates frames at input_end and
// publishes them in batches; the output worker consumes frames at
// input_start. Free space is whatever lies between the two cursors,
// possibly split across the physical end of the ring. A frame is never
// split: when the tail segment is too short the producer leaves a
// wraparound marker and continues at offset 0.
//
// Cursor loads and stores are Relaxed on both sides. The eventfd
// signal/wait pair (consumer -> producer) and the commit-queue push/pop
// (producer -> consumer) carry the acquire/release edges.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::event::Event;
use crate::frame::{self, DispatchFn, FRAME_ALIGNMENT, FRAME_HEADER_SIZE, WRAPAROUND_MARKER};
use crate::queue::CommitExtent;
use crate::runtime::Shared;

pub(crate) struct InputBuffer {
    storage: *mut u8,
    capacity: usize,
    /// Next free slot; only the owning producer stores.
    input_end: AtomicUsize,
    /// Published-so-far offset; producer-local bookkeeping.
    commit_end: AtomicUsize,
    /// Consumer cursor; only the output worker stores.
    input_start: AtomicUsize,
    /// Signaled by the worker after each frame discard; waited on by the
    /// producer when the ring is too full.
    input_consumed_event: Event,
    shared: Arc<Shared>,
    producer_waits: AtomicU64,
    wraparounds: AtomicU64,
}

// SAFETY: InputBuffer is Send + Sync because:
// - Exactly one thread (the owning producer) stores input_end and
//   commit_end and writes frame bytes, always into free space.
// - Exactly one thread (the output worker) stores input_start and reads
//   frame bytes, always inside a published commit extent.
// - The regions the two sides touch are disjoint by the cursor
//   protocol; the events and the commit queue order them.
unsafe impl Send for InputBuffer {}
unsafe impl Sync for InputBuffer {}

impl InputBuffer {
    /// Allocate a ring of `capacity` bytes bound to the shared runtime
    /// state.
    ///
    /// # Panics
    /// Panics if `capacity` is not a sufficiently large multiple of
    /// `FRAME_ALIGNMENT`; `Config::validate` enforces this upstream.
    pub(crate) fn new(capacity: usize, shared: Arc<Shared>) -> io::Result<Arc<Self>> {
        assert!(
            capacity % FRAME_ALIGNMENT == 0 && capacity >= 4 * FRAME_ALIGNMENT,
            "ring capacity {capacity} is not a usable multiple of {FRAME_ALIGNMENT}"
        );
        let input_consumed_event = Event::new()?;

        let layout = Layout::from_size_align(capacity, FRAME_ALIGNMENT)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "ring capacity too large"))?;
        let storage = unsafe { alloc_zeroed(layout) };
        if storage.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "cannot allocate input ring",
            ));
        }

        Ok(Arc::new(Self {
            storage,
            capacity,
            input_end: AtomicUsize::new(0),
            commit_end: AtomicUsize::new(0),
            input_start: AtomicUsize::new(0),
            input_consumed_event,
            shared,
            producer_waits: AtomicU64::new(0),
            wraparounds: AtomicU64::new(0),
        }))
    }

    /// Move a cursor forward by `distance`, wrapping capacity -> 0.
    ///
    /// Frames are contiguous, so an advance never crosses the physical
    /// end; it can only land exactly on it, which wraps to offset 0.
    fn advance(&self, offset: usize, distance: usize) -> usize {
        debug_assert_eq!(distance % FRAME_ALIGNMENT, 0);
        let next = offset + distance;
        debug_assert!(next <= self.capacity);
        if next == self.capacity {
            0
        } else {
            next
        }
    }

    #[inline]
    pub(crate) fn frame_ptr(&self, offset: usize) -> *const u8 {
        debug_assert!(offset < self.capacity);
        unsafe { self.storage.add(offset) }
    }

    #[inline]
    fn frame_ptr_mut(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.capacity);
        unsafe { self.storage.add(offset) }
    }

    // ========================================================================
    // Producer side (owning thread only)
    // ========================================================================

    /// Reserve `size` contiguous bytes for one frame, blocking while the
    /// ring is too full. Returns the frame's byte offset.
    ///
    /// `size` must be a nonzero multiple of `FRAME_ALIGNMENT` and
    /// strictly smaller than the ring.
    pub(crate) fn allocate_input_frame(self: &Arc<Self>, size: usize) -> usize {
        debug_assert!(size > 0 && size % FRAME_ALIGNMENT == 0);
        assert!(
            size < self.capacity,
            "frame of {size} bytes cannot fit a {}-byte ring",
            self.capacity
        );
        loop {
            let input_end = self.input_end.load(Ordering::Relaxed);
            debug_assert!(input_end < self.capacity);
            debug_assert_eq!(input_end % FRAME_ALIGNMENT, 0);
            // A stale input_start only under-reports free space; the
            // worker never takes space away. The event wait below is
            // what refreshes it when we have to block.
            let input_start = self.input_start.load(Ordering::Relaxed);

            if input_start > input_end {
                // Free space is one contiguous run. Taking all of it
                // would make the cursors meet, and equal cursors must
                // keep meaning "empty": hence the strict inequality.
                let free = input_start - input_end;
                if size < free {
                    self.input_end
                        .store(self.advance(input_end, size), Ordering::Relaxed);
                    return input_end;
                }
            } else {
                // Free space is split across the physical end.
                let tail_free = self.capacity - input_end;
                if size < tail_free {
                    self.input_end
                        .store(self.advance(input_end, size), Ordering::Relaxed);
                    return input_end;
                }
                let head_free = input_start;
                if size < head_free {
                    // The tail segment is too short but the head fits.
                    // Leave a marker telling the worker to skip ahead;
                    // alignment guarantees the marker word fits in the
                    // tail remnant.
                    unsafe {
                        frame::write_dispatch_word(
                            self.frame_ptr_mut(input_end),
                            WRAPAROUND_MARKER,
                        );
                    }
                    self.wraparounds.fetch_add(1, Ordering::Relaxed);
                    self.input_end.store(self.advance(0, size), Ordering::Relaxed);
                    return 0;
                }
            }

            self.producer_waits.fetch_add(1, Ordering::Relaxed);
            self.wait_input_consumed();
        }
    }

    /// Encode one frame: the dispatch word, then the payload.
    pub(crate) fn write_frame(self: &Arc<Self>, dispatch: DispatchFn, payload: &[u8]) {
        let size = frame::frame_size_for(payload.len());
        let offset = self.allocate_input_frame(size);
        unsafe {
            let p = self.frame_ptr_mut(offset);
            frame::write_dispatch_word(p, dispatch as usize);
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                p.add(FRAME_HEADER_SIZE),
                payload.len(),
            );
        }
    }

    /// Encode one frame with a length-prefixed payload, avoiding an
    /// intermediate copy of `bytes`.
    pub(crate) fn write_prefixed_frame(self: &Arc<Self>, dispatch: DispatchFn, bytes: &[u8]) {
        let size = frame::frame_size_for(std::mem::size_of::<usize>() + bytes.len());
        let offset = self.allocate_input_frame(size);
        unsafe {
            let p = self.frame_ptr_mut(offset);
            frame::write_dispatch_word(p, dispatch as usize);
            let body = p.add(FRAME_HEADER_SIZE);
            std::ptr::copy_nonoverlapping(
                bytes.len().to_ne_bytes().as_ptr(),
                body,
                std::mem::size_of::<usize>(),
            );
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                body.add(std::mem::size_of::<usize>()),
                bytes.len(),
            );
        }
    }

    /// Publish all locally written frames to the worker.
    pub(crate) fn commit(self: &Arc<Self>) {
        let input_end = self.input_end.load(Ordering::Relaxed);
        if self.commit_end.swap(input_end, Ordering::Relaxed) == input_end {
            // Nothing new since the last publish.
            return;
        }
        if !self.shared.worker_alive() {
            // Nothing will ever drain the extent.
            return;
        }
        self.shared.queue_commit_extent(CommitExtent {
            buffer: Some(Arc::clone(self)),
            commit_end: input_end,
        });
    }

    fn wait_input_consumed(self: &Arc<Self>) {
        // If everything the worker was told about has been consumed,
        // the data filling the ring must be unpublished and no signal
        // will ever come: publish it first.
        if self.commit_end.load(Ordering::Relaxed) == self.input_start.load(Ordering::Relaxed) {
            self.commit();
        }
        assert!(
            self.shared.worker_alive(),
            "frame written after cleanup(); the ring can no longer drain"
        );
        self.input_consumed_event.wait();
    }

    /// Commit leftovers and wait for the worker to drain the ring; used
    /// when the owning thread goes away. Gives up once the worker is
    /// gone, since nothing will drain the ring then.
    pub(crate) fn drain_for_shutdown(self: &Arc<Self>) {
        self.commit();
        while !self.is_empty() {
            if !self.shared.worker_alive() {
                return;
            }
            self.input_consumed_event
                .wait_timeout(Duration::from_millis(50));
        }
    }

    pub(crate) fn worker_alive(&self) -> bool {
        self.shared.worker_alive()
    }

    // ========================================================================
    // Consumer side (output worker only)
    // ========================================================================

    /// Current consumer cursor.
    pub(crate) fn input_start(&self) -> usize {
        self.input_start.load(Ordering::Relaxed)
    }

    /// Release one frame back to the producer and wake it.
    pub(crate) fn discard_input_frame(&self, size: usize) -> usize {
        // Relaxed is enough: the store publishes no data, it only
        // returns space, and the event signal fences it.
        let next = self.advance(self.input_start.load(Ordering::Relaxed), size);
        self.input_start.store(next, Ordering::Relaxed);
        self.input_consumed_event.signal();
        next
    }

    /// Skip the consumer cursor to the start of the ring.
    ///
    /// Does not signal: no meaningful space is freed until the frame
    /// after the marker is discarded.
    pub(crate) fn wraparound(&self) -> usize {
        debug_assert_eq!(
            unsafe {
                frame::read_dispatch_word(self.frame_ptr(self.input_start.load(Ordering::Relaxed)))
            },
            WRAPAROUND_MARKER,
            "wraparound without a marker at the consumer cursor"
        );
        self.input_start.store(0, Ordering::Relaxed);
        0
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Times the producer blocked waiting for ring space.
    pub(crate) fn producer_waits(&self) -> u64 {
        self.producer_waits.load(Ordering::Relaxed)
    }

    /// Wraparound markers written.
    pub(crate) fn wraparounds(&self) -> u64 {
        self.wraparounds.load(Ordering::Relaxed)
    }

    /// True when every allocated frame has been consumed.
    pub(crate) fn is_empty(&self) -> bool {
        self.input_start.load(Ordering::Relaxed) == self.input_end.load(Ordering::Relaxed)
    }
}

impl Drop for InputBuffer {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity, FRAME_ALIGNMENT)
            .expect("layout was valid at construction");
        unsafe { dealloc(self.storage, layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::frame::frame_size_for;
    use std::thread;

    fn test_shared() -> Arc<Shared> {
        Shared::new(Config {
            shared_queue_capacity: 16,
            ..Config::default()
        })
        .unwrap()
    }

    fn ring(capacity: usize) -> (Arc<InputBuffer>, Arc<Shared>) {
        let shared = test_shared();
        let buffer = InputBuffer::new(capacity, Arc::clone(&shared)).unwrap();
        (buffer, shared)
    }

    /// Drain every queued extent the way the worker would, without
    /// dispatching: walk frames by their recorded sizes.
    fn consume_extent(buffer: &Arc<InputBuffer>, commit_end: usize, sizes: &mut Vec<usize>) {
        let mut offset = buffer.input_start();
        while offset != commit_end {
            let word = unsafe { frame::read_dispatch_word(buffer.frame_ptr(offset)) };
            if word == WRAPAROUND_MARKER {
                offset = buffer.wraparound();
                continue;
            }
            let size = sizes.remove(0);
            offset = buffer.discard_input_frame(size);
        }
    }

    #[test]
    fn test_sequential_allocation() {
        let (buffer, _shared) = ring(64);
        assert_eq!(buffer.allocate_input_frame(24), 0);
        assert_eq!(buffer.allocate_input_frame(24), 24);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_allocate_consume_returns_to_empty() {
        let (buffer, shared) = ring(128);
        buffer.allocate_input_frame(16);
        buffer.allocate_input_frame(32);
        buffer.commit();

        let extent = shared.queue.pop().unwrap();
        assert_eq!(extent.commit_end, 48);
        consume_extent(&buffer, extent.commit_end, &mut vec![16, 32]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.input_start(), buffer.input_end.load(Ordering::Relaxed));
    }

    #[test]
    fn test_wraparound_marker_protocol() {
        let (buffer, shared) = ring(64);

        // Fill to offset 48 and let the consumer catch up.
        assert_eq!(buffer.allocate_input_frame(24), 0);
        assert_eq!(buffer.allocate_input_frame(24), 24);
        buffer.commit();
        let extent = shared.queue.pop().unwrap();
        consume_extent(&buffer, extent.commit_end, &mut vec![24, 24]);
        assert_eq!(buffer.input_start(), 48);

        // The tail holds 16 bytes: too short for another 24-byte frame,
        // so the producer marks the tail and continues at offset 0.
        assert_eq!(buffer.allocate_input_frame(24), 0);
        assert_eq!(buffer.wraparounds(), 1);
        let marker = unsafe { frame::read_dispatch_word(buffer.frame_ptr(48)) };
        assert_eq!(marker, WRAPAROUND_MARKER);

        // The consumer sees the marker and resumes at offset 0.
        buffer.commit();
        let extent = shared.queue.pop().unwrap();
        assert_eq!(extent.commit_end, 24);
        consume_extent(&buffer, extent.commit_end, &mut vec![24]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_exact_tail_fill_wraps_instead() {
        let (buffer, shared) = ring(64);
        assert_eq!(buffer.allocate_input_frame(32), 0);
        assert_eq!(buffer.allocate_input_frame(24), 32);
        buffer.commit();
        let extent = shared.queue.pop().unwrap();
        consume_extent(&buffer, extent.commit_end, &mut vec![32, 24]);
        assert_eq!(buffer.input_start(), 56);

        // Eight bytes of tail remain and the ring is otherwise empty; a
        // frame of exactly the tail size still wraps, because filling
        // the tail completely would land the cursor on the physical end.
        assert_eq!(buffer.allocate_input_frame(8), 0);
        assert_eq!(buffer.wraparounds(), 1);
        assert_eq!(buffer.input_end.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_contiguous_boundary_allocation() {
        let (buffer, shared) = ring(64);

        // Park the consumer cursor at 56, then wrap the producer so the
        // free run is contiguous: [E, S) with E < S.
        assert_eq!(buffer.allocate_input_frame(24), 0);
        assert_eq!(buffer.allocate_input_frame(24), 24);
        assert_eq!(buffer.allocate_input_frame(8), 48);
        buffer.commit();
        let extent = shared.queue.pop().unwrap();
        consume_extent(&buffer, extent.commit_end, &mut vec![24, 24, 8]);
        assert_eq!(buffer.input_start(), 56);
        assert_eq!(buffer.allocate_input_frame(32), 0);
        assert_eq!(buffer.wraparounds(), 1);

        // Free run is [32, 56): 24 bytes. One frame alignment less than
        // the free run is the largest allocation that succeeds.
        assert_eq!(buffer.allocate_input_frame(16), 32);
    }

    #[test]
    fn test_full_ring_blocks_until_consumed() {
        let (buffer, shared) = ring(64);

        // 56 bytes in a 64-byte ring: 8 bytes free, and a frame of 8
        // would make the cursors meet, so the producer must block.
        assert_eq!(buffer.allocate_input_frame(56), 0);

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.allocate_input_frame(16))
        };

        // The blocked producer publishes its pending frames first so the
        // consumer has something to work with.
        let extent = loop {
            if let Some(extent) = shared.queue.pop() {
                break extent;
            }
            thread::yield_now();
        };
        assert_eq!(extent.commit_end, 56);
        consume_extent(&buffer, extent.commit_end, &mut vec![56]);

        // With the ring drained the producer gets its frame; the tail
        // remnant is too short, so it lands at offset 0 behind a marker.
        let offset = producer.join().unwrap();
        assert_eq!(offset, 0);
        assert!(buffer.producer_waits() >= 1);
    }

    #[test]
    fn test_commit_without_new_frames_publishes_nothing() {
        let (buffer, shared) = ring(64);
        buffer.commit();
        assert!(shared.queue.is_empty());

        buffer.allocate_input_frame(16);
        buffer.commit();
        assert!(shared.queue.pop().is_some());
        buffer.commit();
        assert!(shared.queue.is_empty());
    }

    #[test]
    fn test_write_frame_encodes_header_and_payload() {
        unsafe fn no_dispatch(_output: &mut crate::output::OutputBuffer, _p: *const u8) -> usize {
            0
        }
        let (buffer, _shared) = ring(128);
        buffer.write_frame(no_dispatch, b"payload");

        let word = unsafe { frame::read_dispatch_word(buffer.frame_ptr(0)) };
        assert_eq!(word, no_dispatch as DispatchFn as usize);
        let payload = unsafe {
            std::slice::from_raw_parts(buffer.frame_ptr(FRAME_HEADER_SIZE), 7)
        };
        assert_eq!(payload, b"payload");
        assert_eq!(
            buffer.input_end.load(Ordering::Relaxed),
            frame_size_for(7)
        );
    }

    #[test]
    #[should_panic(expected = "cannot fit")]
    fn test_oversized_frame_is_rejected() {
        let (buffer, _shared) = ring(64);
        buffer.allocate_input_frame(64);
    }
}
