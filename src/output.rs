// Worker-owned staging buffer between dispatch callbacks and the sink
//
// Dispatch functions reserve/commit byte ranges; the worker flushes the
// staged range to the writer after draining each commit extent. The
// buffer also owns the sink-failure state machine: transient failures
// keep the staged bytes for a bounded number of retries, permanent
// failures switch the buffer into a swallowing mode that keeps the rest
// of the pipeline draining while bytes are discarded.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::io;
use std::ptr::NonNull;

use nix::sys::mman::{madvise, MmapAdvise};

use crate::writer::{WriteResult, Writer};

enum SinkState {
    Writing,
    /// The sink returned GiveUp (or exhausted its retry budget); keep
    /// draining but discard everything destined for it.
    Swallowing,
}

pub struct OutputBuffer {
    writer: Box<dyn Writer>,
    base: *mut u8,
    layout: Layout,
    capacity: usize,
    committed: usize,
    state: SinkState,
    retry_limit: u32,
    retries_left: u32,
    bytes_written: u64,
    bytes_discarded: u64,
}

// SAFETY: OutputBuffer is Send because:
// - The raw allocation is exclusively owned by this struct.
// - The boxed writer is itself Send.
// It is intentionally not Sync; the output worker is its only user.
unsafe impl Send for OutputBuffer {}

impl OutputBuffer {
    pub(crate) fn new(
        writer: Box<dyn Writer>,
        max_capacity: usize,
        retry_limit: u32,
    ) -> io::Result<Self> {
        assert!(max_capacity > 0, "output buffer capacity must be nonzero");

        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let layout = Layout::from_size_align(max_capacity, page)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "output buffer too large"))?;
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "cannot allocate output buffer",
            ));
        }

        // Pages past the first stay cold until a large record shows up;
        // hand them back to the kernel until then. Only whole pages
        // inside the allocation are eligible.
        let advisable = (max_capacity.saturating_sub(page) / page) * page;
        if advisable > 0 {
            unsafe {
                let tail = NonNull::new_unchecked(base.add(page).cast::<libc::c_void>());
                let _ = madvise(tail, advisable, MmapAdvise::MADV_DONTNEED);
            }
        }

        Ok(Self {
            writer,
            base,
            layout,
            capacity: max_capacity,
            committed: 0,
            state: SinkState::Writing,
            retry_limit,
            retries_left: retry_limit,
            bytes_written: 0,
            bytes_discarded: 0,
        })
    }

    /// Capacity of the staging buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hand out `size` contiguous writable bytes past the committed
    /// watermark, flushing first if the tail is too short.
    ///
    /// # Panics
    ///
    /// When `size` exceeds the whole staging buffer; a single record
    /// that large is a misconfiguration, not a runtime condition.
    pub fn reserve(&mut self, size: usize) -> &mut [u8] {
        assert!(
            size <= self.capacity,
            "record of {size} bytes exceeds the {}-byte output buffer",
            self.capacity
        );
        if self.capacity - self.committed < size {
            self.flush();
            if self.capacity - self.committed < size {
                // The sink is refusing bytes while the buffer is full;
                // retaining the staged data would wedge the worker.
                self.bytes_discarded += self.committed as u64;
                self.committed = 0;
            }
        }
        unsafe { std::slice::from_raw_parts_mut(self.base.add(self.committed), size) }
    }

    /// Advance the committed watermark over bytes written into the
    /// slice returned by the matching [`reserve`](Self::reserve).
    pub fn commit(&mut self, size: usize) {
        debug_assert!(self.committed + size <= self.capacity);
        self.committed += size;
    }

    /// Write the staged bytes to the sink and reset the watermark.
    ///
    /// Transient sink failures keep the staged bytes for the next flush
    /// until the retry budget runs out; permanent failures switch to
    /// swallowing. A write error the sink cannot classify is fatal and
    /// aborts the process.
    pub fn flush(&mut self) {
        if self.committed == 0 {
            return;
        }
        if let SinkState::Swallowing = self.state {
            self.bytes_discarded += self.committed as u64;
            self.committed = 0;
            return;
        }

        let staged = unsafe { std::slice::from_raw_parts(self.base, self.committed) };
        match self.writer.write(staged) {
            Ok(WriteResult::Success) => {
                self.bytes_written += self.committed as u64;
                self.committed = 0;
                self.retries_left = self.retry_limit;
            }
            Ok(WriteResult::TryLater) => {
                if self.retries_left == 0 {
                    self.give_up();
                } else {
                    // Keep the staged bytes; the next flush retries them.
                    self.retries_left -= 1;
                }
            }
            Ok(WriteResult::GiveUp) => self.give_up(),
            Err(err) => {
                // The sink contract was violated and the staged data has
                // nowhere to go.
                eprintln!("ringlog: fatal sink error: {err}");
                std::process::abort();
            }
        }
    }

    fn give_up(&mut self) {
        eprintln!("ringlog: sink gave up; further output will be discarded");
        self.bytes_discarded += self.committed as u64;
        self.committed = 0;
        self.state = SinkState::Swallowing;
    }

    /// Bytes currently staged and not yet flushed.
    pub fn pending(&self) -> usize {
        self.committed
    }

    /// Total bytes accepted by the sink.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Total bytes dropped after the sink gave up or refused to keep up.
    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }

    /// True once the sink has been given up on.
    pub fn is_swallowing(&self) -> bool {
        matches!(self.state, SinkState::Swallowing)
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}
