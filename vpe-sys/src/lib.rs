// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! # vpe-sys: Raw V4L2 and DMA-heap ABI for the VPE memory-to-memory device
//!
//! This crate provides low-level, unsafe Rust declarations of the kernel
//! structures and ioctls needed to drive a multi-planar V4L2 memory-to-memory
//! device with externally allocated DMA buffers.
//!
//! ## Overview
//!
//! `vpe-sys` exposes:
//! - `#[repr(C)]` mirrors of the `videodev2.h` structures (`v4l2_capability`,
//!   `v4l2_format`, `v4l2_buffer`, `v4l2_plane`, `v4l2_requestbuffers`, `v4l2_crop`)
//! - The `dma-heap.h` allocation request
//! - Constants for buffer types, memory modes, field orders, capabilities and fourccs
//! - ioctl entry points generated with the `nix` ioctl macros
//!
//! ## Usage
//!
//! **Most users should NOT use this crate directly.** Use the safe [`vpe`] crate
//! instead, which provides:
//! - Owned file descriptors and safe request/response types
//! - Rust-idiomatic error handling with `Result`
//! - The buffer pool and field-splitting logic built on top of these calls
//!
//! ## Safety
//!
//! All ioctl functions in this crate are `unsafe` and require the caller to uphold
//! the kernel's invariants:
//! - The file descriptor must refer to an open V4L2 (or DMA-heap) device
//! - Plane arrays referenced from `v4l2_buffer::m.planes` must stay alive for the call
//!   and hold at least `v4l2_buffer::length` entries
//! - The active union member must match the buffer type passed in
//!
//! [`vpe`]: https://docs.rs/vpe

#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

mod dma_heap;
mod ioctl;
mod videodev2;

pub use dma_heap::*;
pub use ioctl::*;
pub use videodev2::*;

/// Implements `Default` as the all-zero bit pattern.
///
/// Used for structures holding unions, which cannot derive `Default`.
macro_rules! zeroed_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: plain-old-data kernel structure; all-zero is a valid
                    // value for every integer, array and raw pointer member.
                    unsafe { std::mem::zeroed() }
                }
            }
        )*
    };
}

zeroed_default!(v4l2_plane, v4l2_buffer, v4l2_format);
