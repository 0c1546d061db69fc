// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Asynchronous logging core.
//!
//! Producer threads encode log records as binary frames in per-thread
//! lock-free ring buffers; one background worker drains the rings
//! through a bounded handoff queue, runs each frame's dispatch function
//! to render bytes into a staging buffer, and flushes the staged bytes
//! to a pluggable [`Writer`].
//!
//! The producer hot path is wait-free while the ring has room: an
//! allocation is two relaxed cursor loads and one store. Producers only
//! block against the consumer (never each other) when their own ring or
//! the shared queue is full.
//!
//! ```no_run
//! let writer = ringlog::FileWriter::create("/tmp/app.log").unwrap();
//! ringlog::initialize(Box::new(writer)).unwrap();
//!
//! ringlog::write_literal("hello\n");
//! ringlog::commit();
//!
//! ringlog::cleanup().unwrap();
//! ```

pub mod config;
mod error;
mod event;
pub mod fmt;
mod frame;
mod input;
mod output;
mod producer;
mod queue;
mod runtime;
mod worker;
mod writer;

pub use config::Config;
pub use error::CoreError;
pub use frame::{align_up, frame_size_for, DispatchFn, FRAME_ALIGNMENT, FRAME_HEADER_SIZE};
pub use output::OutputBuffer;
pub use producer::{commit, ring_stats, write_frame, write_literal, RingStats};
pub use runtime::{cleanup, initialize, initialize_with_config};
pub use writer::{FileWriter, WriteResult, Writer};
