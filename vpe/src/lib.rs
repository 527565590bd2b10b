// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! # VPE - buffer management for the TI Video Processing Engine
//!
//! Buffer pools and the processing element for the VPE memory-to-memory
//! scaler and deinterlacer, driven through the V4L2 multi-planar API with
//! DMABUF memory.
//!
//! ## Overview
//!
//! A memory-to-memory device has two queues. Frames to process go in on the
//! *output* queue and come back on the *capture* queue. Each queue gets a
//! [`BufferPool`] that allocates exportable DMA memory up front, hands the
//! buffers out, queues them to the driver and takes them back.
//!
//! ### Key Concepts
//!
//! - **Pool**: A fixed set of buffers for one queue ([`BufferPool`])
//! - **Buffer**: A counted handle on one pooled buffer ([`VpeBuffer`])
//! - **Physical slot**: One driver-visible buffer index. With interlaced input every
//!   frame owns four of them, one per field the driver may see.
//! - **Processor**: The element tying both pools to a device ([`Processor`])
//!
//! ## Architecture
//!
//! ```text
//! upstream ──► Processor::push ──► submission BufferPool ──► VIDIOC_QBUF (output)
//!                                                                  │
//!                                                             VPE hardware
//!                                                                  │
//! downstream ◄── OutputPump ◄── capture BufferPool ◄── VIDIOC_DQBUF (capture)
//! ```
//!
//! Dropping the last handle on a capture buffer while streaming queues it
//! back to the driver. Submission buffers return to the free list once the
//! driver has finished with every field.
//!
//! ## Examples
//!
//! ### Running one pool against the emulated device
//!
//! ```no_run
//! use vpe::{BufferPool, PixelFormat, PoolSettings, device::EmulatedDevice, memory::MemfdAllocator};
//!
//! # fn main() -> Result<(), vpe::Error> {
//! let device = EmulatedDevice::new();
//! let settings = PoolSettings::submission(4, PixelFormat::Nv12, 720, 480);
//! let pool = BufferPool::new(settings, &MemfdAllocator)?;
//! pool.set_streaming(&device, true, true)?;
//!
//! let frame = pool.get().expect("free buffer");
//! let queued = pool.queue(frame)?;
//! println!("{queued} field slots queued");
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - [`BufferPool`] and [`VpeBuffer`] are `Send + Sync`
//! - Every pool operation, driver calls included, runs under the pool's lock
//! - Dropping a [`VpeBuffer`] may take the lock of the pool it belongs to

mod error;

pub mod buffer;
pub mod config;
pub mod device;
pub mod format;
pub mod memory;
pub mod pool;
pub mod processor;
pub mod pump;

pub use buffer::{FrameFlags, PlaneLayout, VpeBuffer};
pub use config::VpeConfig;
pub use error::{Error, FlowError, FlowResult, Result};
pub use format::{Crop, Field, FieldParity, InterlacePolicy, PixelFormat, VideoInfo};
pub use pool::{AcquireMode, BufferPool, Direction, PoolSettings, SlotSnapshot, SlotState};
pub use processor::{Event, MediaElement, Processor};
pub use pump::{Downstream, OutputPump};
