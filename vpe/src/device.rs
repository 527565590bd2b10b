// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! The driver surface the pools talk to.
//!
//! [`VideoDevice`] is a safe rendering of the multi-planar V4L2 ioctls used by
//! the VPE path. [`V4l2Device`] issues them against a real device node;
//! [`EmulatedDevice`] runs an in-process model of a memory-to-memory driver.

pub mod emulated;
pub mod v4l2;

use std::{os::fd::RawFd, time::Duration};

pub use emulated::{EmulatedDevice, IoctlCall};
pub use v4l2::V4l2Device;

use crate::{Crop, Field, PixelFormat, Result};

/// The two queues of a memory-to-memory device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Processed frames returned by the driver.
    VideoCaptureMplane,
    /// Frames submitted to the driver for processing.
    VideoOutputMplane,
}

impl BufferType {
    pub fn as_raw(self) -> u32 {
        match self {
            BufferType::VideoCaptureMplane => vpe_sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
            BufferType::VideoOutputMplane => vpe_sys::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
        }
    }
}

impl std::fmt::Display for BufferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferType::VideoCaptureMplane => f.write_str("capture"),
            BufferType::VideoOutputMplane => f.write_str("output"),
        }
    }
}

/// Result of `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
}

impl Capability {
    /// True if the node is a multi-planar memory-to-memory streaming device.
    pub fn is_m2m_mplane(&self) -> bool {
        let caps = if self.capabilities & vpe_sys::V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        };
        caps & vpe_sys::V4L2_CAP_VIDEO_M2M_MPLANE != 0 && caps & vpe_sys::V4L2_CAP_STREAMING != 0
    }
}

/// Arguments of `VIDIOC_S_FMT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    pub buf_type: BufferType,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub field: Field,
}

/// Per-plane part of a negotiated format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneFormat {
    pub size_image: u32,
    pub bytes_per_line: u32,
}

/// Format the driver settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub field: Field,
    pub planes: Vec<PlaneFormat>,
}

/// One DMA-buffer plane of a queued buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneRef {
    pub fd: RawFd,
    pub length: u32,
    pub data_offset: u32,
    pub bytes_used: u32,
}

/// Arguments of `VIDIOC_QBUF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRequest {
    pub buf_type: BufferType,
    /// Physical driver index.
    pub index: u32,
    pub field: Field,
    /// `None` is passed to the driver as the invalid-timestamp sentinel.
    pub timestamp: Option<Duration>,
    pub planes: Vec<PlaneRef>,
}

/// A buffer returned by `VIDIOC_DQBUF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Physical driver index.
    pub index: u32,
    pub field: Field,
    /// `None` when the driver reported the invalid-timestamp sentinel.
    pub timestamp: Option<Duration>,
    pub sequence: u32,
    pub flags: u32,
    pub bytes_used: Vec<u32>,
}

/// A multi-planar memory-to-memory video device using DMA-buffer memory.
///
/// All calls are non-blocking. [`VideoDevice::dequeue_buffer`] reports an
/// empty queue as an EAGAIN [`crate::Error::Ioctl`].
pub trait VideoDevice: Send + Sync {
    /// Returns a handle sharing the same open file description.
    fn try_clone(&self) -> Result<Box<dyn VideoDevice>>;

    fn query_capability(&self) -> Result<Capability>;

    fn set_format(&self, request: &FormatRequest) -> Result<NegotiatedFormat>;

    fn set_crop(&self, buf_type: BufferType, crop: &Crop) -> Result<()>;

    /// Registers `count` DMA-buffer slots and returns how many were granted.
    fn request_buffers(&self, buf_type: BufferType, count: u32) -> Result<u32>;

    /// Returns the driver's plane lengths for one slot.
    fn query_buffer(&self, buf_type: BufferType, index: u32, num_planes: usize)
    -> Result<Vec<u32>>;

    fn queue_buffer(&self, request: &QueueRequest) -> Result<()>;

    fn dequeue_buffer(&self, buf_type: BufferType, num_planes: usize) -> Result<DequeuedBuffer>;

    fn stream_on(&self, buf_type: BufferType) -> Result<()>;

    fn stream_off(&self, buf_type: BufferType) -> Result<()>;
}
