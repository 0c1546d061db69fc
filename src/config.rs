// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Tunables for the logging core.
//!
//! JSON5 configuration format supporting:
//! - Comments and trailing commas
//! - Partial files (omitted fields take their defaults)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::frame::FRAME_ALIGNMENT;

/// Default staging-buffer capacity (1 MiB).
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default per-producer ring size.
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 8 * 4096;

/// Default commit-extent queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default number of consecutive transient flush failures tolerated
/// before the sink is given up on.
pub const DEFAULT_FLUSH_RETRY_LIMIT: u32 = 8;

/// Runtime tunables, fixed at `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Staging-buffer capacity in bytes. A single dispatch emitting more
    /// than this is a fatal misconfiguration.
    #[serde(default = "default_output_buffer_size")]
    pub max_output_buffer_size: usize,

    /// Per-producer ring size in bytes; a multiple of the frame
    /// alignment, and the hard bound on a single frame.
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,

    /// Capacity of the shared commit-extent queue (nonzero power of two).
    #[serde(default = "default_queue_capacity")]
    pub shared_queue_capacity: usize,

    /// Consecutive transient flush failures tolerated before the worker
    /// stops writing to the sink.
    #[serde(default = "default_flush_retry_limit")]
    pub flush_retry_limit: u32,
}

fn default_output_buffer_size() -> usize {
    DEFAULT_OUTPUT_BUFFER_SIZE
}

fn default_input_buffer_size() -> usize {
    DEFAULT_INPUT_BUFFER_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_flush_retry_limit() -> u32 {
    DEFAULT_FLUSH_RETRY_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            shared_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_retry_limit: DEFAULT_FLUSH_RETRY_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to a JSON5-compatible string
    pub fn to_json5(&self) -> String {
        // json5 has no pretty printer; serde_json output is valid JSON5.
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_output_buffer_size == 0 {
            return Err(ConfigError::OutputBufferSize);
        }
        if self.shared_queue_capacity == 0 || !self.shared_queue_capacity.is_power_of_two() {
            return Err(ConfigError::QueueCapacity {
                got: self.shared_queue_capacity,
            });
        }
        // The ring must hold a wraparound marker plus at least one small
        // frame on each side of the split.
        let min_ring = 4 * FRAME_ALIGNMENT;
        if self.input_buffer_size % FRAME_ALIGNMENT != 0 || self.input_buffer_size < min_ring {
            return Err(ConfigError::InputBufferSize {
                align: FRAME_ALIGNMENT,
                min: min_ring,
                got: self.input_buffer_size,
            });
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("max_output_buffer_size must be nonzero")]
    OutputBufferSize,

    #[error("shared_queue_capacity must be a nonzero power of two, got {got}")]
    QueueCapacity { got: usize },

    #[error("input_buffer_size must be a multiple of {align} and at least {min}, got {got}")]
    InputBufferSize { align: usize, min: usize, got: usize },
}
