// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer pools bound to one queue of the memory-to-memory device.
//!
//! A [`BufferPool`] owns a fixed arena of DMA buffers and tracks, per buffer,
//! whether it is free, held by the application or held by the driver. The
//! submission pool feeds the driver's output queue and can block in
//! [`BufferPool::get`] until a buffer comes back; the capture pool keeps the
//! driver's capture queue topped up by requeueing every buffer released while
//! streaming.
//!
//! ## Locking
//!
//! All state lives behind one mutex, which is also held across the driver
//! calls so that a tracking-table transition and the ioctl it mirrors are
//! observed together. The device is opened non-blocking, so none of those
//! calls sleep. The lock is never held while a buffer reference is dropped.
//!
//! ## Physical slots
//!
//! A submission pool streaming interlaced input with
//! [`InterlacePolicy::FieldAlternate`] registers four driver slots per buffer
//! (see [`fields`]); every other pool registers one. The tracking table is per
//! logical buffer and its `q_cnt` counts the physical slots in flight.

mod fields;
mod tracking;

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{Span, debug, error, trace, warn};

pub use tracking::{SlotSnapshot, SlotState};

use self::{
    fields::FIELD_SLOTS,
    tracking::{PhysicalSlot, TrackingTable},
};
use crate::{
    Error, Field, FieldParity, InterlacePolicy, PixelFormat, Result,
    buffer::{BufferDescriptor, FrameFlags, VpeBuffer},
    device::{BufferType, PlaneRef, QueueRequest, VideoDevice},
    memory::DmaAllocator,
};

/// Which device queue a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frames going into the accelerator (V4L2 output queue).
    Submission,
    /// Processed frames coming out (V4L2 capture queue).
    Capture,
}

impl Direction {
    pub fn buffer_type(self) -> BufferType {
        match self {
            Direction::Submission => BufferType::VideoOutputMplane,
            Direction::Capture => BufferType::VideoCaptureMplane,
        }
    }

    fn auto_requeue(self) -> bool {
        self == Direction::Capture
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Submission => f.write_str("submission"),
            Direction::Capture => f.write_str("capture"),
        }
    }
}

/// Behaviour of [`BufferPool::get`] when no buffer is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Wait until a buffer is released, or the pool flushes or shuts down.
    Block,
    /// Return `None`; the caller retries later.
    Poll,
}

/// Construction parameters of a [`BufferPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub direction: Direction,
    /// Number of logical buffers.
    pub capacity: usize,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub interlace_policy: InterlacePolicy,
    pub acquire: AcquireMode,
}

impl PoolSettings {
    /// A blocking submission pool.
    pub fn submission(capacity: usize, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            direction: Direction::Submission,
            capacity,
            format,
            width,
            height,
            interlace_policy: InterlacePolicy::default(),
            acquire: AcquireMode::Block,
        }
    }

    /// A polling capture pool.
    pub fn capture(capacity: usize, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            direction: Direction::Capture,
            acquire: AcquireMode::Poll,
            ..Self::submission(capacity, format, width, height)
        }
    }

    pub fn with_interlace_policy(mut self, policy: InterlacePolicy) -> Self {
        self.interlace_policy = policy;
        self
    }

    pub fn with_acquire_mode(mut self, acquire: AcquireMode) -> Self {
        self.acquire = acquire;
        self
    }
}

struct PoolState {
    streaming: bool,
    flushing: bool,
    shutting_down: bool,
    interlaced: bool,
    last_field: Option<FieldParity>,
    slots_per_buffer: usize,
    /// Duplicate of the shared device descriptor, present while streaming.
    device: Option<Box<dyn VideoDevice>>,
    table: TrackingTable,
    physical: Vec<PhysicalSlot>,
}

type DriverRefs = Vec<(Arc<BufferDescriptor>, usize)>;

pub(crate) struct PoolShared {
    settings: PoolSettings,
    span: Span,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolShared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn splits_fields(&self, interlaced: bool) -> bool {
        self.settings.direction == Direction::Submission
            && interlaced
            && self.settings.interlace_policy == InterlacePolicy::FieldAlternate
    }

    /// Runs once the last reference to `descriptor` is gone.
    ///
    /// While shutting down the buffer leaves the arena and its memory is
    /// freed; a streaming capture pool requeues it; otherwise it becomes free.
    pub(crate) fn finalize(&self, descriptor: &Arc<BufferDescriptor>) -> Result<()> {
        let _enter = self.span.enter();
        let index = descriptor.index();
        let mut state = self.lock_state();
        if state.shutting_down {
            state.table.detach(index);
            drop(state);
            descriptor.release_memory();
            debug!(index, "Pool is shutting down, buffer detached");
            return Err(Error::ShuttingDown);
        }
        if self.settings.direction.auto_requeue() && state.streaming {
            match self.queue_physical(&mut state, index, descriptor, Field::Any, None) {
                Ok(()) => {
                    descriptor.set_refs(1);
                    state.table.mark_with_driver(index, 1);
                    trace!(index, "Buffer requeued");
                    return Ok(());
                }
                Err(err) => {
                    error!(index, "Failed to requeue buffer: {err}");
                    state.table.release(index);
                    self.available.notify_one();
                    return Err(err);
                }
            }
        }
        state.table.release(index);
        trace!(index, "Buffer returned to free list");
        self.available.notify_one();
        Ok(())
    }

    /// Hands one physical slot backed by `descriptor` to the driver.
    fn queue_physical(
        &self,
        state: &mut PoolState,
        physical_index: usize,
        descriptor: &BufferDescriptor,
        field: Field,
        timestamp: Option<Duration>,
    ) -> Result<()> {
        let fd = descriptor.raw_fd().ok_or(Error::ShuttingDown)?;
        let slot = state
            .physical
            .get(physical_index)
            .ok_or_else(|| Error::Other(format!("No physical slot {physical_index}")))?;
        let bytes_used = descriptor.meta().bytes_used.clone();
        let planes = slot
            .planes
            .iter()
            .enumerate()
            .map(|(plane, layout)| PlaneRef {
                fd,
                length: layout.length,
                data_offset: layout.data_offset,
                bytes_used: bytes_used.get(plane).copied().unwrap_or(0),
            })
            .collect();
        let request = QueueRequest {
            buf_type: self.settings.direction.buffer_type(),
            index: physical_index as u32,
            field,
            timestamp,
            planes,
        };
        let device = state.device.as_deref().ok_or(Error::NotStreaming)?;
        device.queue_buffer(&request)?;
        if let Some(slot) = state.physical.get_mut(physical_index) {
            slot.queued = true;
        }
        Ok(())
    }

    /// Queues an application-owned buffer and returns how many slots took it.
    fn submit(&self, state: &mut PoolState, descriptor: &Arc<BufferDescriptor>) -> usize {
        let index = descriptor.index();
        let (timestamp, flags) = {
            let meta = descriptor.meta();
            (meta.timestamp, meta.flags)
        };
        let queued = if state.slots_per_buffer == FIELD_SLOTS {
            self.submit_fields(state, descriptor, timestamp, flags)
        } else {
            let field = if state.interlaced && self.settings.direction == Direction::Submission {
                Field::SeqTb
            } else {
                Field::Any
            };
            match self.queue_physical(state, index, descriptor, field, timestamp) {
                Ok(()) => 1,
                Err(err) => {
                    error!(index, "Failed to queue buffer: {err}");
                    0
                }
            }
        };
        if queued > 0 {
            state.table.mark_with_driver(index, queued);
            descriptor.add_refs(queued - 1);
        }
        queued
    }

    fn submit_fields(
        &self,
        state: &mut PoolState,
        descriptor: &BufferDescriptor,
        timestamp: Option<Duration>,
        flags: FrameFlags,
    ) -> usize {
        let index = descriptor.index();
        let steps = match fields::plan(
            flags.top_field_first,
            flags.repeat_first_field,
            state.last_field,
        ) {
            Ok(steps) => steps,
            Err(parity) => {
                warn!(
                    index,
                    "Last field pushed was {parity:?} and frame {index} also starts with it, dropping frame"
                );
                return 0;
            }
        };
        let base = index * FIELD_SLOTS;
        let mut queued = 0;
        for step in steps {
            let physical_index = base + step.slot;
            let timestamp = if step.carries_timestamp {
                timestamp
            } else {
                None
            };
            if let Err(err) =
                self.queue_physical(state, physical_index, descriptor, step.parity.into(), timestamp)
            {
                error!(
                    index,
                    physical_index,
                    "Failed to queue {:?} field: {err}",
                    step.parity
                );
                break;
            }
            state.last_field = Some(step.parity);
            queued += 1;
        }
        queued
    }

    fn stream_on_locked(
        &self,
        state: &mut PoolState,
        device: &dyn VideoDevice,
        interlaced: bool,
    ) -> Result<()> {
        let buf_type = self.settings.direction.buffer_type();
        let device = device.try_clone()?;
        let slots_per_buffer = if self.splits_fields(interlaced) {
            FIELD_SLOTS
        } else {
            1
        };
        let requested = (state.table.len() * slots_per_buffer) as u32;
        let granted = device.request_buffers(buf_type, requested)?;
        if granted != requested {
            error!(requested, granted, "Driver did not grant the requested buffers");
            return Err(Error::BufferCountMismatch { requested, granted });
        }

        let mut physical = Vec::with_capacity(requested as usize);
        for physical_index in 0..requested as usize {
            let logical = physical_index / slots_per_buffer;
            let descriptor = state
                .table
                .descriptor(logical)
                .ok_or(Error::ShuttingDown)?;
            let mut planes = descriptor.planes().to_vec();
            if slots_per_buffer == FIELD_SLOTS && physical_index & 1 == 1 {
                fields::shift_to_bottom_field(&mut planes, descriptor.field_offset());
            }
            let driver_lengths =
                device.query_buffer(buf_type, physical_index as u32, planes.len())?;
            trace!(physical_index, ?driver_lengths, "Queried buffer");
            physical.push(PhysicalSlot {
                planes,
                queued: false,
            });
        }

        state.physical = physical;
        state.slots_per_buffer = slots_per_buffer;
        state.interlaced = interlaced;
        state.last_field = None;
        state.device = Some(device);

        if self.settings.direction.auto_requeue() {
            for index in 0..state.table.len() {
                if state.table.state(index) != Some(SlotState::Free) {
                    continue;
                }
                let Some(descriptor) = state.table.descriptor(index).cloned() else {
                    continue;
                };
                if let Err(err) = self.queue_physical(state, index, &descriptor, Field::Any, None) {
                    error!(index, "Failed to pre-submit buffer: {err}");
                    Self::abort_stream_on(state);
                    return Err(err);
                }
                descriptor.set_refs(1);
                state.table.mark_with_driver(index, 1);
            }
        } else {
            for index in 0..state.table.len() {
                if let Some(descriptor) = state.table.descriptor(index) {
                    descriptor.meta().bytes_used.fill(0);
                }
            }
        }

        let stream_on = match state.device.as_deref() {
            Some(device) => device.stream_on(buf_type),
            None => Err(Error::NotStreaming),
        };
        if let Err(err) = stream_on {
            error!("Failed to start streaming: {err}");
            Self::abort_stream_on(state);
            return Err(err);
        }
        state.streaming = true;
        debug!(
            buffers = state.table.len(),
            physical = requested,
            interlaced,
            "Streaming started"
        );
        Ok(())
    }

    /// Undoes a partial stream-on; pre-submitted buffers become free again.
    fn abort_stream_on(state: &mut PoolState) {
        state.device = None;
        for slot in &mut state.physical {
            slot.queued = false;
        }
        for (descriptor, q_cnt) in state.table.reclaim_all() {
            if descriptor.drop_refs(q_cnt) == 0 {
                state.table.release(descriptor.index());
            }
        }
    }

    fn stream_off_locked(&self, state: &mut PoolState) -> (Result<()>, DriverRefs) {
        state.streaming = false;
        let result = match state.device.take() {
            Some(device) => device.stream_off(self.settings.direction.buffer_type()),
            None => Ok(()),
        };
        if let Err(err) = &result {
            error!("Failed to stop streaming: {err}");
        }
        for slot in &mut state.physical {
            slot.queued = false;
        }
        let reclaimed = state.table.reclaim_all();
        debug!(reclaimed = reclaimed.len(), "Streaming stopped");
        (result, reclaimed)
    }

    /// Drops references taken back from the driver. Must be called unlocked.
    fn drop_driver_refs(&self, reclaimed: DriverRefs) {
        for (descriptor, q_cnt) in reclaimed {
            if descriptor.drop_refs(q_cnt) == 0 {
                let _ = self.finalize(&descriptor);
            }
        }
    }
}

/// A pool of DMA buffers serving one device queue.
///
/// Cloning yields another handle to the same pool.
///
/// # Examples
///
/// ```no_run
/// use vpe::{BufferPool, PixelFormat, PoolSettings, device::V4l2Device, memory::MemfdAllocator};
///
/// # fn main() -> Result<(), vpe::Error> {
/// let device = V4l2Device::open("/dev/video0")?;
/// let pool = BufferPool::new(
///     PoolSettings::submission(6, PixelFormat::Nv12, 720, 480),
///     &MemfdAllocator,
/// )?;
/// pool.set_streaming(&device, true, false)?;
/// if let Some(buffer) = pool.try_get() {
///     pool.queue(buffer)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Allocates every buffer of the pool up front.
    ///
    /// Log output is attributed to a `vpe_pool` span carrying the direction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty pool, or the allocator's error.
    pub fn new(settings: PoolSettings, allocator: &dyn DmaAllocator) -> Result<Self> {
        let span = tracing::info_span!("vpe_pool", direction = %settings.direction);
        Self::with_span(settings, allocator, span)
    }

    /// Like [`BufferPool::new`], logging under the given span.
    pub fn with_span(settings: PoolSettings, allocator: &dyn DmaAllocator, span: Span) -> Result<Self> {
        if settings.capacity == 0 {
            return Err(Error::InvalidConfig("pool capacity must be positive".to_string()));
        }
        let descriptors = (0..settings.capacity)
            .map(|index| {
                BufferDescriptor::allocate(
                    index,
                    settings.format,
                    settings.width,
                    settings.height,
                    allocator,
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        span.in_scope(|| {
            debug!(
                capacity = settings.capacity,
                width = settings.width,
                height = settings.height,
                format = %settings.format,
                "Allocated pool buffers"
            )
        });
        let state = PoolState {
            streaming: false,
            flushing: false,
            shutting_down: false,
            interlaced: false,
            last_field: None,
            slots_per_buffer: 1,
            device: None,
            table: TrackingTable::new(descriptors),
            physical: Vec::new(),
        };
        Ok(Self {
            shared: Arc::new(PoolShared {
                settings,
                span,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.shared.settings
    }

    pub fn direction(&self) -> Direction {
        self.shared.settings.direction
    }

    pub fn capacity(&self) -> usize {
        self.shared.settings.capacity
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.lock_state().streaming
    }

    pub fn is_flushing(&self) -> bool {
        self.shared.lock_state().flushing
    }

    /// Driver slots registered at the last stream-on.
    pub fn physical_count(&self) -> usize {
        self.shared.lock_state().physical.len()
    }

    pub fn free_count(&self) -> usize {
        self.shared.lock_state().table.free_count()
    }

    /// Per-buffer state, for diagnostics.
    pub fn tracking_snapshot(&self) -> Vec<SlotSnapshot> {
        self.shared.lock_state().table.snapshot()
    }

    /// True if `buffer` was allocated by this pool.
    pub fn owns(&self, buffer: &VpeBuffer) -> bool {
        Arc::ptr_eq(buffer.pool(), &self.shared)
    }

    /// Takes the lowest-indexed free buffer.
    ///
    /// A [`AcquireMode::Block`] pool waits for a release when none is free;
    /// the wait ends with `None` once the pool is flushing or shutting down.
    pub fn get(&self) -> Option<VpeBuffer> {
        self.acquire(self.shared.settings.acquire == AcquireMode::Block)
    }

    /// Takes a free buffer without waiting.
    pub fn try_get(&self) -> Option<VpeBuffer> {
        self.acquire(false)
    }

    fn acquire(&self, block: bool) -> Option<VpeBuffer> {
        let _enter = self.shared.span.enter();
        let mut state = self.shared.lock_state();
        loop {
            if state.shutting_down {
                debug!("Pool is shutting down, no buffer");
                return None;
            }
            let free = state.table.first_free();
            if let Some(descriptor) = free.and_then(|index| state.table.acquire(index)) {
                descriptor.set_refs(1);
                trace!(index = descriptor.index(), "Buffer acquired");
                return Some(VpeBuffer::adopt(self.shared.clone(), descriptor));
            }
            if !block || state.flushing {
                return None;
            }
            trace!("No free buffer, waiting");
            state = self
                .shared
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Releases one reference to `buffer`.
    ///
    /// Equivalent to dropping it, but reports what happened when this was the
    /// last reference.
    ///
    /// # Errors
    ///
    /// - [`Error::ForeignBuffer`] if the buffer belongs to another pool
    /// - [`Error::ShuttingDown`] if the pool was destroyed; the buffer is detached
    /// - the driver error if a capture buffer could not be requeued
    pub fn put(&self, buffer: VpeBuffer) -> Result<()> {
        if !self.owns(&buffer) {
            return Err(Error::ForeignBuffer);
        }
        let (_pool, descriptor) = buffer.into_parts();
        if descriptor.drop_refs(1) == 0 {
            self.shared.finalize(&descriptor)
        } else {
            Ok(())
        }
    }

    /// Hands an application-owned buffer to the driver.
    ///
    /// Progressive frames, and interlaced frames under
    /// [`InterlacePolicy::SequentialTopBottom`], take one driver slot.
    /// Interlaced frames under [`InterlacePolicy::FieldAlternate`] are split
    /// into two fields, three with [`FrameFlags::repeat_first_field`], in the
    /// order given by [`FrameFlags::top_field_first`]. Only the leading field
    /// carries the timestamp.
    ///
    /// Returns the number of driver slots that took the buffer. A frame whose
    /// leading field repeats the last field pushed is dropped with a warning
    /// and `Ok(0)`; a driver error part-way through keeps the fields already
    /// queued. When nothing was queued the caller's reference is released.
    ///
    /// # Errors
    ///
    /// - [`Error::ForeignBuffer`] if the buffer belongs to another pool
    /// - [`Error::NotStreaming`] before [`BufferPool::set_streaming`]; the buffer is released
    /// - [`Error::ShuttingDown`] after [`BufferPool::destroy`]
    pub fn queue(&self, buffer: VpeBuffer) -> Result<usize> {
        let _enter = self.shared.span.enter();
        if !self.owns(&buffer) {
            warn!("Refusing to queue a buffer from another pool");
            return Err(Error::ForeignBuffer);
        }
        let (pool, descriptor) = buffer.into_parts();
        let index = descriptor.index();
        let outcome = {
            let mut state = self.shared.lock_state();
            if state.shutting_down {
                Err(Error::ShuttingDown)
            } else if !state.streaming {
                Err(Error::NotStreaming)
            } else {
                match state.table.state(index) {
                    Some(SlotState::Allocated) => Ok(self.shared.submit(&mut state, &descriptor)),
                    other => {
                        warn!(index, state = ?other, "Buffer is not held by the application, not queuing it");
                        Ok(0)
                    }
                }
            }
        };
        match outcome {
            Ok(queued) if queued > 0 => Ok(queued),
            other => {
                drop(VpeBuffer::adopt(pool, descriptor));
                other
            }
        }
    }

    /// Takes one completed buffer back from the driver, without blocking.
    ///
    /// Returns `None` when nothing is ready, when the driver fails (logged),
    /// or when the driver returns a slot this pool did not queue (warned).
    pub fn dequeue(&self) -> Option<VpeBuffer> {
        let _enter = self.shared.span.enter();
        let mut state = self.shared.lock_state();
        if !state.table.any_with_driver() {
            return None;
        }
        let buf_type = self.shared.settings.direction.buffer_type();
        let num_planes = self.shared.settings.format.num_planes();
        let completed = match state.device.as_deref()?.dequeue_buffer(buf_type, num_planes) {
            Ok(completed) => completed,
            Err(err) if err.is_try_again() => return None,
            Err(err) => {
                error!("Failed to dequeue buffer: {err}");
                return None;
            }
        };
        let physical_index = completed.index as usize;
        let index = if state.slots_per_buffer == FIELD_SLOTS {
            physical_index >> 2
        } else {
            physical_index
        };
        match state.physical.get_mut(physical_index) {
            Some(slot) if slot.queued => slot.queued = false,
            _ => {
                warn!(physical_index, "Driver returned a slot that was not queued");
                return None;
            }
        }
        let Some(descriptor) = state.table.complete_one(index) else {
            warn!(index, "Dequeued buffer was not with the driver");
            return None;
        };
        {
            let mut meta = descriptor.meta();
            meta.timestamp = completed.timestamp;
            meta.field = completed.field;
            meta.sequence = completed.sequence;
            for (dst, src) in meta.bytes_used.iter_mut().zip(&completed.bytes_used) {
                *dst = *src;
            }
        }
        drop(state);
        trace!(index, physical_index, "Buffer dequeued");
        Some(VpeBuffer::adopt(self.shared.clone(), descriptor))
    }

    /// Starts or stops streaming on the pool's queue.
    ///
    /// Starting duplicates `device`, registers the driver slots (four per
    /// buffer for field-alternate interlaced submission), queries their
    /// layout, pre-submits every free buffer of a capture pool and issues
    /// `STREAMON`. Stopping issues `STREAMOFF`, releases the duplicate and
    /// takes every buffer back from the driver, waking blocked
    /// [`BufferPool::get`] callers. Either direction is a no-op when the pool
    /// is already in that state.
    ///
    /// # Errors
    ///
    /// Start-up errors are returned as-is, including
    /// [`Error::BufferCountMismatch`]. A failed `STREAMOFF` is returned after
    /// the buffers have been reclaimed.
    pub fn set_streaming(
        &self,
        device: &dyn VideoDevice,
        streaming: bool,
        interlaced: bool,
    ) -> Result<()> {
        if streaming {
            self.start_streaming(device, interlaced)
        } else {
            self.stop_streaming()
        }
    }

    pub fn start_streaming(&self, device: &dyn VideoDevice, interlaced: bool) -> Result<()> {
        let _enter = self.shared.span.enter();
        let mut state = self.shared.lock_state();
        if state.shutting_down {
            return Err(Error::ShuttingDown);
        }
        if state.streaming {
            return Ok(());
        }
        self.shared.stream_on_locked(&mut state, device, interlaced)
    }

    pub fn stop_streaming(&self) -> Result<()> {
        let _enter = self.shared.span.enter();
        let (result, reclaimed) = {
            let mut state = self.shared.lock_state();
            if !state.streaming {
                return Ok(());
            }
            let stopped = self.shared.stream_off_locked(&mut state);
            self.shared.available.notify_all();
            stopped
        };
        self.shared.drop_driver_refs(reclaimed);
        result
    }

    /// Makes blocked and future [`BufferPool::get`] calls return `None` while set.
    pub fn set_flushing(&self, flushing: bool) {
        let _enter = self.shared.span.enter();
        let mut state = self.shared.lock_state();
        state.flushing = flushing;
        self.shared.available.notify_all();
        debug!(flushing, "Flushing changed");
    }

    /// Tears the pool down.
    ///
    /// Stops streaming if needed, marks the pool shutting down and frees the
    /// memory of every buffer nobody references. Buffers still referenced
    /// elsewhere are detached and freed when their last reference goes.
    pub fn destroy(&self) {
        let _enter = self.shared.span.enter();
        let (reclaimed, idle) = {
            let mut state = self.shared.lock_state();
            if state.shutting_down {
                return;
            }
            let reclaimed = if state.streaming {
                self.shared.stream_off_locked(&mut state).1
            } else {
                Vec::new()
            };
            state.shutting_down = true;
            self.shared.available.notify_all();
            (reclaimed, state.table.detach_free())
        };
        let freed = idle.iter().filter(|d| d.release_memory()).count();
        self.shared.drop_driver_refs(reclaimed);
        debug!(freed, "Pool destroyed");
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("settings", &self.shared.settings)
            .finish()
    }
}
