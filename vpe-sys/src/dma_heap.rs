// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Declarations from `linux/dma-heap.h`.

/// Directory holding one character device per DMA heap.
pub const DMA_HEAP_DEVICE_DIR: &str = "/dev/dma_heap";

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dma_heap_allocation_data {
    pub len: u64,
    pub fd: u32,
    pub fd_flags: u32,
    pub heap_flags: u64,
}
