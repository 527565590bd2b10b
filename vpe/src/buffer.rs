// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Pool buffers and the handles that reference them.
//!
//! A [`BufferDescriptor`] is one DMA-backed frame owned by a pool arena. User
//! code holds it through [`VpeBuffer`] handles; every handle, and every
//! physical driver slot the frame is queued in, accounts for one reference.
//! When the count reaches zero the owning pool's finalize step runs and
//! decides between recycling the frame and freeing its memory.

use std::{
    fmt,
    os::fd::{AsFd, AsRawFd, OwnedFd, RawFd},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    Crop, Error, Field, PixelFormat, Result,
    memory::{DmaAllocator, DmaMemory},
    pool::PoolShared,
};

/// Placement of one plane inside the buffer's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub length: u32,
    pub data_offset: u32,
}

/// Interlacing flags carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    pub top_field_first: bool,
    /// 3:2 pulldown; the leading field is shown twice.
    pub repeat_first_field: bool,
}

/// Per-frame data that changes every time the buffer cycles.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameMeta {
    pub(crate) timestamp: Option<Duration>,
    pub(crate) flags: FrameFlags,
    pub(crate) crop: Option<Crop>,
    pub(crate) field: Field,
    pub(crate) bytes_used: Vec<u32>,
    pub(crate) sequence: u32,
}

pub(crate) struct BufferDescriptor {
    index: usize,
    format: PixelFormat,
    width: u32,
    height: u32,
    size: usize,
    planes: Vec<PlaneLayout>,
    memory: Mutex<Option<DmaMemory>>,
    meta: Mutex<FrameMeta>,
    refs: AtomicUsize,
}

impl BufferDescriptor {
    pub(crate) fn allocate(
        index: usize,
        format: PixelFormat,
        width: u32,
        height: u32,
        allocator: &dyn DmaAllocator,
    ) -> Result<Self> {
        let size = format.frame_size(width, height);
        let memory = allocator.allocate(size)?;
        let planes = format.plane_layouts(width, height);
        let meta = FrameMeta {
            crop: Some(Crop::full(width, height)),
            bytes_used: vec![0; planes.len()],
            ..Default::default()
        };
        Ok(Self {
            index,
            format,
            width,
            height,
            size,
            planes,
            memory: Mutex::new(Some(memory)),
            meta: Mutex::new(meta),
            refs: AtomicUsize::new(0),
        })
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    /// Distance from the top field to the bottom field in a sequential frame.
    pub(crate) fn field_offset(&self) -> u32 {
        match self.planes.get(1) {
            Some(chroma) => chroma.data_offset >> 1,
            None => (self.size / 2) as u32,
        }
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|memory| memory.as_fd().as_raw_fd())
    }

    /// Closes the DMA handle. Returns false if it was already released.
    pub(crate) fn release_memory(&self) -> bool {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub(crate) fn meta(&self) -> MutexGuard<'_, FrameMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn set_refs(&self, refs: usize) {
        self.refs.store(refs, Ordering::Release);
    }

    pub(crate) fn add_refs(&self, refs: usize) {
        self.refs.fetch_add(refs, Ordering::AcqRel);
    }

    /// Drops `refs` references and returns how many are left.
    pub(crate) fn drop_refs(&self, refs: usize) -> usize {
        let previous = self.refs.fetch_sub(refs, Ordering::AcqRel);
        debug_assert!(previous >= refs, "buffer {} over-released", self.index);
        previous - refs
    }
}

impl fmt::Debug for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("index", &self.index)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A reference to one pool buffer.
///
/// Cloning takes another reference. Dropping the last reference returns the
/// buffer to its pool: a capture pool hands it straight back to the driver
/// while streaming, other pools put it on the free list and wake a waiting
/// [`crate::BufferPool::get`]. Use [`crate::BufferPool::put`] to observe the
/// outcome of that release.
pub struct VpeBuffer {
    pool: Arc<PoolShared>,
    descriptor: Arc<BufferDescriptor>,
    /// False once the counted reference was handed off by `into_parts`.
    counted: bool,
}

impl VpeBuffer {
    /// Wraps a reference that has already been counted.
    pub(crate) fn adopt(pool: Arc<PoolShared>, descriptor: Arc<BufferDescriptor>) -> Self {
        Self {
            pool,
            descriptor,
            counted: true,
        }
    }

    /// Gives up the handle without releasing its reference.
    pub(crate) fn into_parts(mut self) -> (Arc<PoolShared>, Arc<BufferDescriptor>) {
        self.counted = false;
        (self.pool.clone(), self.descriptor.clone())
    }

    pub(crate) fn pool(&self) -> &Arc<PoolShared> {
        &self.pool
    }

    /// Slot index inside the owning pool.
    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn format(&self) -> PixelFormat {
        self.descriptor.format
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    /// Allocation size in bytes.
    pub fn size(&self) -> usize {
        self.descriptor.size
    }

    pub fn planes(&self) -> &[PlaneLayout] {
        &self.descriptor.planes
    }

    /// Number of live references, including driver slots.
    pub fn ref_count(&self) -> usize {
        self.descriptor.ref_count()
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.descriptor.meta().timestamp
    }

    pub fn set_timestamp(&self, timestamp: Option<Duration>) {
        self.descriptor.meta().timestamp = timestamp;
    }

    pub fn flags(&self) -> FrameFlags {
        self.descriptor.meta().flags
    }

    pub fn set_flags(&self, flags: FrameFlags) {
        self.descriptor.meta().flags = flags;
    }

    /// Region of interest attached to the frame.
    pub fn crop(&self) -> Option<Crop> {
        self.descriptor.meta().crop
    }

    pub fn set_crop(&self, crop: Option<Crop>) {
        self.descriptor.meta().crop = crop;
    }

    /// Field tag reported by the driver on the last completion.
    pub fn field(&self) -> Field {
        self.descriptor.meta().field
    }

    /// Frame counter reported by the driver on the last completion.
    pub fn sequence(&self) -> u32 {
        self.descriptor.meta().sequence
    }

    /// Per-plane payload sizes.
    pub fn bytes_used(&self) -> Vec<u32> {
        self.descriptor.meta().bytes_used.clone()
    }

    pub fn set_bytes_used(&self, bytes_used: &[u32]) {
        let mut meta = self.descriptor.meta();
        for (dst, src) in meta.bytes_used.iter_mut().zip(bytes_used) {
            *dst = *src;
        }
    }

    /// Duplicates the DMA handle for a consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the memory was already freed, or
    /// [`Error::Io`] if duplication fails.
    pub fn export_fd(&self) -> Result<OwnedFd> {
        let memory = self
            .descriptor
            .memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match memory.as_ref() {
            Some(memory) => memory.try_clone_fd(),
            None => Err(Error::ShuttingDown),
        }
    }
}

impl Clone for VpeBuffer {
    fn clone(&self) -> Self {
        self.descriptor.add_refs(1);
        Self {
            pool: self.pool.clone(),
            descriptor: self.descriptor.clone(),
            counted: true,
        }
    }
}

impl Drop for VpeBuffer {
    fn drop(&mut self) {
        if self.counted && self.descriptor.drop_refs(1) == 0 {
            // Failures are logged by the pool.
            let _ = self.pool.finalize(&self.descriptor);
        }
    }
}

impl fmt::Debug for VpeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpeBuffer")
            .field("index", &self.index())
            .field("format", &self.format())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("refs", &self.ref_count())
            .finish()
    }
}
