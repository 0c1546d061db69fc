// SPDX-License-Identifier: Apache-2.0 OR MIT
// Process-wide runtime: shared handoff state and the worker lifecycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::CoreError;
use crate::event::Event;
use crate::output::OutputBuffer;
use crate::queue::{CommitExtent, SharedInputQueue};
use crate::worker::output_worker;
use crate::writer::Writer;

/// State shared between every producer and the output worker.
pub(crate) struct Shared {
    pub(crate) queue: SharedInputQueue,
    /// Producers signal when the queue is full; the worker waits on it
    /// between pops.
    pub(crate) queue_full_event: Event,
    /// The worker signals after every pop; producers wait on it in the
    /// publish slow path.
    pub(crate) queue_consumed_event: Event,
    worker_alive: AtomicBool,
    pub(crate) config: Config,
}

impl Shared {
    pub(crate) fn new(config: Config) -> std::io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            queue: SharedInputQueue::with_capacity(config.shared_queue_capacity),
            queue_full_event: Event::new()?,
            queue_consumed_event: Event::new()?,
            worker_alive: AtomicBool::new(true),
            config,
        }))
    }

    pub(crate) fn worker_alive(&self) -> bool {
        self.worker_alive.load(Ordering::Acquire)
    }

    pub(crate) fn mark_worker_exited(&self) {
        self.worker_alive.store(false, Ordering::Release);
    }

    /// Publish one extent, blocking while the queue is full.
    ///
    /// The slow path kicks the worker awake and waits for it to make
    /// room, rechecking worker liveness so a publish attempted after
    /// shutdown cannot hang.
    pub(crate) fn queue_commit_extent(&self, extent: CommitExtent) {
        let mut extent = extent;
        loop {
            match self.queue.push(extent) {
                Ok(()) => return,
                Err(back) => extent = back,
            }
            if !self.worker_alive() {
                // Nothing will ever drain the queue; drop the extent.
                return;
            }
            self.queue_full_event.signal();
            self.queue_consumed_event
                .wait_timeout(Duration::from_millis(50));
        }
    }
}

struct Runtime {
    shared: Arc<Shared>,
    worker: thread::JoinHandle<()>,
}

static RUNTIME: Mutex<Option<Runtime>> = Mutex::new(None);

/// The shared state of the currently installed runtime, if any.
pub(crate) fn current_shared() -> Option<Arc<Shared>> {
    RUNTIME
        .lock()
        .unwrap()
        .as_ref()
        .map(|runtime| Arc::clone(&runtime.shared))
}

/// Start the logging core with default tunables.
pub fn initialize(writer: Box<dyn Writer>) -> Result<(), CoreError> {
    initialize_with_config(writer, Config::default())
}

/// Start the logging core: validate the configuration, construct the
/// output buffer, spawn the output worker and install the process-wide
/// handle.
pub fn initialize_with_config(writer: Box<dyn Writer>, config: Config) -> Result<(), CoreError> {
    config.validate()?;

    let mut slot = RUNTIME.lock().unwrap();
    if slot.is_some() {
        return Err(CoreError::AlreadyInitialized);
    }

    let shared = Shared::new(config.clone())?;
    let output = OutputBuffer::new(writer, config.max_output_buffer_size, config.flush_retry_limit)?;

    let worker_shared = Arc::clone(&shared);
    let worker = thread::Builder::new()
        .name("ringlog-output".into())
        .spawn(move || output_worker(worker_shared, output))?;

    *slot = Some(Runtime { shared, worker });
    Ok(())
}

/// Stop the logging core.
///
/// Publishes the calling thread's pending frames, sends the shutdown
/// sentinel and joins the worker; every extent committed before the
/// call reaches the sink first. Producers must not log afterwards.
pub fn cleanup() -> Result<(), CoreError> {
    let runtime = RUNTIME
        .lock()
        .unwrap()
        .take()
        .ok_or(CoreError::NotInitialized)?;

    crate::producer::commit();
    runtime.shared.queue_commit_extent(CommitExtent {
        buffer: None,
        commit_end: 0,
    });
    runtime
        .worker
        .join()
        .map_err(|_| CoreError::WorkerPanicked)?;

    debug_assert!(
        runtime.shared.queue.is_empty(),
        "commit extents left behind after shutdown"
    );
    Ok(())
}
