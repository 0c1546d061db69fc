// The output worker: drains commit extents and feeds the sink

use std::sync::Arc;
use std::time::Duration;

use crate::frame::{self, DispatchFn, WRAPAROUND_MARKER};
use crate::output::OutputBuffer;
use crate::runtime::Shared;

const MAX_BACKOFF_MS: u64 = 1000;

/// Flips the worker-alive flag even if a dispatch function panics, so
/// blocked producers notice the worker is gone instead of waiting
/// forever.
struct ExitFlag(Arc<Shared>);

impl Drop for ExitFlag {
    fn drop(&mut self) {
        self.0.mark_worker_exited();
    }
}

pub(crate) fn output_worker(shared: Arc<Shared>, mut output: OutputBuffer) {
    let _exit = ExitFlag(Arc::clone(&shared));

    loop {
        // Pop the next extent, backing off 0, 1, 2, 4 ... 1000 ms while
        // the queue stays empty. The zero wait is an immediate probe.
        let mut wait_ms = 0u64;
        let extent = loop {
            match shared.queue.pop() {
                Some(extent) => break extent,
                None => {
                    shared
                        .queue_full_event
                        .wait_timeout(Duration::from_millis(wait_ms));
                    wait_ms = if wait_ms == 0 {
                        1
                    } else {
                        (wait_ms * 2).min(MAX_BACKOFF_MS)
                    };
                }
            }
        };
        // Wake one producer stuck publishing into the full queue.
        shared.queue_consumed_event.signal();

        let Some(buffer) = extent.buffer else {
            // Shutdown sentinel. Everything committed before it has
            // already been drained and flushed.
            return;
        };

        let mut offset = buffer.input_start();
        while offset != extent.commit_end {
            let mut word = unsafe { frame::read_dispatch_word(buffer.frame_ptr(offset)) };
            if word == WRAPAROUND_MARKER {
                offset = buffer.wraparound();
                word = unsafe { frame::read_dispatch_word(buffer.frame_ptr(offset)) };
            }
            // SAFETY: the producer stored a valid dispatch pointer in
            // every non-marker frame it published.
            let dispatch: DispatchFn = unsafe { std::mem::transmute(word) };
            let frame_size = unsafe { dispatch(&mut output, buffer.frame_ptr(offset)) };
            offset = buffer.discard_input_frame(frame_size);
        }

        output.flush();
    }
}
