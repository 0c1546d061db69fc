// Producer-side API: the thread-local ring and frame encoding
//
// Each logging thread owns one ring, created on first use and bound to
// the runtime that was installed at that moment. A slot left over from
// a runtime that has since been cleaned up is detected by the dead
// worker flag and quietly replaced.

use std::cell::RefCell;
use std::sync::Arc;

use crate::frame::{frame_size_for, DispatchFn, FRAME_HEADER_SIZE};
use crate::input::InputBuffer;
use crate::output::OutputBuffer;

struct ProducerSlot {
    buffer: Arc<InputBuffer>,
}

impl Drop for ProducerSlot {
    fn drop(&mut self) {
        // Publish leftovers and let the worker finish with the ring
        // before the owning thread disappears.
        self.buffer.drain_for_shutdown();
    }
}

thread_local! {
    static INPUT_BUFFER: RefCell<Option<ProducerSlot>> = const { RefCell::new(None) };
}

/// Run `f` with the calling thread's input ring, creating it on first
/// use.
///
/// # Panics
///
/// When the core is not initialized, and when the ring cannot be
/// allocated; both are fatal at first-use time by contract.
pub(crate) fn with_input_buffer<R>(f: impl FnOnce(&Arc<InputBuffer>) -> R) -> R {
    INPUT_BUFFER.with(|slot| {
        let mut slot = slot.borrow_mut();
        let stale = matches!(&*slot, Some(current) if !current.buffer.worker_alive());
        if stale {
            *slot = None;
        }
        if slot.is_none() {
            let shared = crate::runtime::current_shared().expect("ringlog is not initialized");
            let size = shared.config.input_buffer_size;
            let buffer = InputBuffer::new(size, shared).expect("cannot allocate input ring");
            *slot = Some(ProducerSlot { buffer });
        }
        f(&slot.as_ref().unwrap().buffer)
    })
}

/// Publish the calling thread's pending frames to the output worker.
///
/// Returning does not mean the frames have reached the sink; delivery
/// is asynchronous and best-effort. A thread that never logged has
/// nothing to publish and this is a no-op.
pub fn commit() {
    INPUT_BUFFER.with(|slot| {
        if let Some(slot) = slot.borrow().as_ref() {
            slot.buffer.commit();
        }
    });
}

/// Write one frame: `dispatch` plus an opaque payload whose layout only
/// `dispatch` understands. The frame is not visible to the worker until
/// the next [`commit`].
#[inline]
pub fn write_frame(dispatch: DispatchFn, payload: &[u8]) {
    with_input_buffer(|buffer| buffer.write_frame(dispatch, payload));
}

/// Write a literal text frame; the built-in dispatch copies the text to
/// the sink verbatim.
#[inline]
pub fn write_literal(text: &str) {
    with_input_buffer(|buffer| buffer.write_prefixed_frame(dispatch_literal, text.as_bytes()));
}

/// Dispatch for [`write_literal`] frames: the payload is a native-endian
/// length followed by that many bytes of text.
unsafe fn dispatch_literal(output: &mut OutputBuffer, frame: *const u8) -> usize {
    let body = frame.add(FRAME_HEADER_SIZE);
    let mut len_bytes = [0u8; std::mem::size_of::<usize>()];
    std::ptr::copy_nonoverlapping(body, len_bytes.as_mut_ptr(), len_bytes.len());
    let len = usize::from_ne_bytes(len_bytes);

    let text = std::slice::from_raw_parts(body.add(len_bytes.len()), len);
    let dst = output.reserve(len);
    dst.copy_from_slice(text);
    output.commit(len);

    frame_size_for(std::mem::size_of::<usize>() + len)
}

/// Counters for the calling thread's ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Times the producer blocked waiting for ring space.
    pub producer_waits: u64,
    /// Wraparound markers written.
    pub wraparounds: u64,
}

/// Stats for the calling thread's ring, if it has one.
pub fn ring_stats() -> Option<RingStats> {
    INPUT_BUFFER.with(|slot| {
        slot.borrow().as_ref().map(|slot| RingStats {
            producer_waits: slot.buffer.producer_waits(),
            wraparounds: slot.buffer.wraparounds(),
        })
    })
}
