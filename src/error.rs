// SPDX-License-Identifier: Apache-2.0 OR MIT
// Errors surfaced by the runtime lifecycle

use thiserror::Error;

/// Errors reported by `initialize` and `cleanup`.
///
/// The producer hot path never returns these; everything recoverable is
/// handled on the worker side.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("logging core is already initialized")]
    AlreadyInitialized,

    #[error("logging core is not initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output worker panicked")]
    WorkerPanicked,
}
