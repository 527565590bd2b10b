// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for VPE operations.
//!
//! This module defines the error type returned by device, pool and processor
//! calls, and the flow error reported towards the media pipeline.

use nix::errno::Errno;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when driving the VPE device and its buffer pools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A V4L2 or DMA-heap ioctl failed.
    #[error("{op} failed: {errno}")]
    Ioctl {
        /// Name of the ioctl, e.g. `VIDIOC_QBUF`.
        op: &'static str,
        /// Error number reported by the kernel.
        errno: Errno,
    },

    /// Opening or duplicating a device node failed.
    #[error("Device I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The pool is not streaming, so buffers cannot be handed to the driver.
    #[error("Pool is not streaming")]
    NotStreaming,

    /// The pool has been destroyed; the buffer was detached instead of recycled.
    #[error("Pool is shutting down")]
    ShuttingDown,

    /// `VIDIOC_REQBUFS` granted a different number of buffers than requested.
    #[error("Requested {requested} buffers, driver granted {granted}")]
    BufferCountMismatch {
        /// Number of physical slots asked for.
        requested: u32,
        /// Number of physical slots the driver registered.
        granted: u32,
    },

    /// The buffer was allocated by another pool.
    #[error("Buffer does not belong to this pool")]
    ForeignBuffer,

    /// The pixel format is not one the device path handles.
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The upstream format changed size after it was first negotiated.
    #[error("Dynamic resolution change from {from:?} to {to:?} is not supported")]
    ResolutionChange {
        /// Previously negotiated width and height.
        from: (u32, u32),
        /// Newly requested width and height.
        to: (u32, u32),
    },

    /// An operation needed the input format before it was negotiated.
    #[error("Input format has not been negotiated")]
    NotNegotiated,

    /// Failed to parse a JSON configuration.
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error for failures not covered by another variant.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Converts the result of a raw ioctl call into a [`Result`].
    ///
    /// # Arguments
    ///
    /// * `op` - The ioctl name recorded in the error
    /// * `result` - Value returned by one of the `vpe_sys` ioctl functions
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let ret = unsafe { vpe_sys::vidioc_qbuf(fd, &mut buffer) };
    /// Error::from_ioctl("VIDIOC_QBUF", ret)?;
    /// ```
    pub fn from_ioctl(op: &'static str, result: nix::Result<nix::libc::c_int>) -> Result<()> {
        result
            .map(|_| ())
            .map_err(|errno| Error::Ioctl { op, errno })
    }

    /// Returns true for the non-blocking "nothing ready yet" condition.
    pub fn is_try_again(&self) -> bool {
        matches!(
            self,
            Error::Ioctl {
                errno: Errno::EAGAIN,
                ..
            }
        )
    }
}

/// Flow results reported to the media pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// The element or pool is flushing or stopped.
    #[error("Flushing")]
    Flushing,
    /// End of stream reached.
    #[error("End of stream")]
    Eos,
    /// Data arrived before the format was negotiated.
    #[error("Not negotiated")]
    NotNegotiated,
    /// Fatal error; the pipeline should stop.
    #[error("Error")]
    Error,
}

/// Convenience result type for push-style data flow.
pub type FlowResult = core::result::Result<(), FlowError>;
