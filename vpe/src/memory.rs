// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! DMA-capable memory for pool buffers.
//!
//! Pool buffers are handed to the driver as `V4L2_MEMORY_DMABUF` file
//! descriptors. [`DmaHeapAllocator`] draws them from a kernel DMA heap;
//! [`MemfdAllocator`] backs them with anonymous memory for hosts without the
//! accelerator.

use std::{
    ffi::CStr,
    fs::{File, OpenOptions},
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
    path::{Path, PathBuf},
};

use nix::{
    fcntl::{FcntlArg, SealFlag, fcntl},
    libc,
    sys::memfd::{MemFdCreateFlag, memfd_create},
};
use tracing::debug;

use crate::{Error, Result};

/// One exportable memory region.
#[derive(Debug)]
pub struct DmaMemory {
    fd: OwnedFd,
    size: usize,
}

impl DmaMemory {
    pub fn new(fd: OwnedFd, size: usize) -> Self {
        Self { fd, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Duplicates the handle for a consumer that keeps its own reference.
    pub fn try_clone_fd(&self) -> Result<OwnedFd> {
        Ok(self.fd.try_clone()?)
    }
}

impl AsFd for DmaMemory {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Source of [`DmaMemory`] regions.
pub trait DmaAllocator: Send + Sync {
    /// Allocates a region of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing device refuses the allocation.
    fn allocate(&self, size: usize) -> Result<DmaMemory>;
}

/// Allocates from a `/dev/dma_heap/<name>` heap.
#[derive(Debug)]
pub struct DmaHeapAllocator {
    heap: File,
    path: PathBuf,
}

impl DmaHeapAllocator {
    /// Opens the named heap, e.g. `"linux,cma"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the heap device cannot be opened.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_path(Path::new(vpe_sys::DMA_HEAP_DEVICE_DIR).join(name))
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let heap = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!("Opened DMA heap {}", path.display());
        Ok(Self { heap, path })
    }
}

impl DmaAllocator for DmaHeapAllocator {
    fn allocate(&self, size: usize) -> Result<DmaMemory> {
        let mut data = vpe_sys::dma_heap_allocation_data {
            len: size as u64,
            fd_flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
            ..Default::default()
        };
        // SAFETY: `heap` is an open DMA heap and `data` outlives the call.
        Error::from_ioctl("DMA_HEAP_IOCTL_ALLOC", unsafe {
            vpe_sys::dma_heap_ioctl_alloc(self.heap.as_raw_fd(), &mut data)
        })?;
        // SAFETY: the kernel returned a freshly created descriptor that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(data.fd as i32) };
        debug!(size, heap = %self.path.display(), "Allocated DMA buffer");
        Ok(DmaMemory::new(fd, size))
    }
}

/// Allocates anonymous `memfd` regions.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemfdAllocator;

const MEMFD_NAME: &CStr = c"vpe-buffer";

impl DmaAllocator for MemfdAllocator {
    fn allocate(&self, size: usize) -> Result<DmaMemory> {
        let fd = memfd_create(
            MEMFD_NAME,
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
        )
        .map_err(std::io::Error::from)?;
        let file = File::from(fd);
        file.set_len(size as u64)?;
        fcntl(
            file.as_raw_fd(),
            FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SHRINK | SealFlag::F_SEAL_GROW),
        )
        .map_err(std::io::Error::from)?;
        Ok(DmaMemory::new(file.into(), size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memfd_has_requested_size() {
        let memory = MemfdAllocator.allocate(4096).unwrap();
        assert_eq!(memory.size(), 4096);
        let file = File::from(memory.try_clone_fd().unwrap());
        assert_eq!(file.metadata().unwrap().len(), 4096);
        assert!(file.set_len(8192).is_err());
    }
}
