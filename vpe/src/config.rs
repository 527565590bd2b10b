// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for the VPE processor.
//!
//! The configuration is a plain serde structure, usually loaded from JSON:
//!
//! ```no_run
//! use vpe::config::VpeConfig;
//!
//! # fn main() -> Result<(), vpe::Error> {
//! let config = VpeConfig::from_json(r#"{
//!     "device": "/dev/video0",
//!     "num_input_buffers": 12,
//!     "num_output_buffers": 6,
//!     "interlace_policy": "field_alternate",
//!     "allocator": { "kind": "dma_heap", "heap": "linux,cma" }
//! }"#)?;
//! assert_eq!(config.num_input_buffers, 12);
//! # Ok(())
//! # }
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    Error, InterlacePolicy, Result,
    memory::{DmaAllocator, DmaHeapAllocator, MemfdAllocator},
};

pub const DEFAULT_DEVICE: &str = "/dev/video0";
pub const MIN_NUM_BUFFERS: u32 = 3;
pub const MAX_NUM_INPUT_BUFFERS: u32 = 24;
pub const MAX_NUM_OUTPUT_BUFFERS: u32 = 16;
pub const DEFAULT_NUM_INPUT_BUFFERS: u32 = MAX_NUM_INPUT_BUFFERS;
pub const DEFAULT_NUM_OUTPUT_BUFFERS: u32 = 8;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_DMA_HEAP: &str = "linux,cma";

/// Where pool buffers get their memory from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocatorConfig {
    /// A named heap under `/dev/dma_heap`.
    DmaHeap { heap: String },
    /// Anonymous memory, for hosts without the accelerator.
    Memfd,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig::DmaHeap {
            heap: DEFAULT_DMA_HEAP.to_string(),
        }
    }
}

impl AllocatorConfig {
    /// Opens the configured allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the DMA heap cannot be opened.
    pub fn build(&self) -> Result<Arc<dyn DmaAllocator>> {
        Ok(match self {
            AllocatorConfig::DmaHeap { heap } => Arc::new(DmaHeapAllocator::open(heap)?),
            AllocatorConfig::Memfd => Arc::new(MemfdAllocator),
        })
    }
}

/// Processor settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct VpeConfig {
    /// V4L2 device node of the accelerator.
    pub device: PathBuf,
    /// Logical buffers in the submission pool (3..=24).
    pub num_input_buffers: u32,
    /// Logical buffers in the capture pool (3..=16).
    pub num_output_buffers: u32,
    /// Handling of interlaced input.
    pub interlace_policy: InterlacePolicy,
    /// Output pump back-off when nothing is ready.
    pub poll_interval_ms: u64,
    pub allocator: AllocatorConfig,
}

impl Default for VpeConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            num_input_buffers: DEFAULT_NUM_INPUT_BUFFERS,
            num_output_buffers: DEFAULT_NUM_OUTPUT_BUFFERS,
            interlace_policy: InterlacePolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            allocator: AllocatorConfig::default(),
        }
    }
}

impl VpeConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input and [`Error::InvalidConfig`]
    /// if a value is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: VpeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads [`VpeConfig::from_json`] input from a file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|error| {
            Error::Other(format!(
                "Error while reading configuration from \"{}\": {}",
                path.display(),
                error
            ))
        })?;
        Self::from_json(&json)
    }

    /// Checks the bounded ranges.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "num_input_buffers",
            self.num_input_buffers,
            MAX_NUM_INPUT_BUFFERS,
        )?;
        check_range(
            "num_output_buffers",
            self.num_output_buffers,
            MAX_NUM_OUTPUT_BUFFERS,
        )?;
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn check_range(name: &str, value: u32, max: u32) -> Result<()> {
    if (MIN_NUM_BUFFERS..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} = {value} is outside {MIN_NUM_BUFFERS}..={max}"
        )))
    }
}
