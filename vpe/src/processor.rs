// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! The VPE element: negotiation, data flow and events around the two pools.
//!
//! [`Processor`] is what pipeline glue drives through [`MediaElement`]. It
//! owns the shared device handle, creates the submission pool once the input
//! format is known, and on the first pushed frame sets up the capture side,
//! starts streaming on both queues and launches the [`OutputPump`].
//!
//! Progressive input with no fixed output size is passed through untouched;
//! interlaced input, or a downstream that requires a specific size, goes
//! through the accelerator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::{
    BufferPool, Crop, Error, Field, FlowError, FlowResult, InterlacePolicy, PixelFormat,
    PoolSettings, Result, VideoInfo, VpeBuffer,
    config::VpeConfig,
    device::{BufferType, FormatRequest, V4l2Device, VideoDevice},
    memory::DmaAllocator,
    pump::{Downstream, OutputPump},
};

/// Crop request as received from upstream.
///
/// `None` for a dimension extends the rectangle to the frame edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRequest {
    pub left: i32,
    pub top: i32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl CropRequest {
    /// Resolves open dimensions against the input size.
    pub fn resolve(&self, width: u32, height: u32) -> Crop {
        Crop {
            left: self.left,
            top: self.top,
            width: self
                .width
                .unwrap_or_else(|| width.saturating_sub(self.left.max(0) as u32)),
            height: self
                .height
                .unwrap_or_else(|| height.saturating_sub(self.top.max(0) as u32)),
        }
    }
}

impl From<Crop> for CropRequest {
    fn from(crop: Crop) -> Self {
        Self {
            left: crop.left,
            top: crop.top,
            width: Some(crop.width),
            height: Some(crop.height),
        }
    }
}

/// Pipeline events the element reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Crop(CropRequest),
    FlushStart,
    FlushStop,
    Segment,
    Eos,
    /// Any other event, forwarded untouched.
    Custom(String),
}

/// Pipeline state transitions relevant to the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Init,
    Active,
    Deinit,
}

/// Geometry of the frames delivered downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: (i32, i32),
    pub pixel_aspect_ratio: (i32, i32),
    pub passthrough: bool,
}

/// The interface pipeline glue uses to drive the element.
pub trait MediaElement: Send + Sync {
    /// Accepts the upstream format.
    fn negotiate(&self, info: &VideoInfo) -> Result<()>;

    /// Processes one upstream frame.
    fn push(&self, buffer: VpeBuffer) -> FlowResult;

    /// Handles an upstream event. Returns whether it was handled.
    fn event(&self, event: Event) -> bool;
}

struct Inner {
    state: ElementState,
    input: Option<VideoInfo>,
    crop: Option<Crop>,
    output: Option<OutputInfo>,
    input_pool: Option<BufferPool>,
    output_pool: Option<BufferPool>,
    pump: Option<OutputPump>,
}

/// The VPE element core.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use vpe::{FlowResult, MediaElement, Processor, VideoInfo, VpeBuffer, config::VpeConfig};
///
/// # fn main() -> Result<(), vpe::Error> {
/// let downstream = Arc::new(|buffer: VpeBuffer| -> FlowResult {
///     println!("frame {} at {:?}", buffer.index(), buffer.timestamp());
///     Ok(())
/// });
/// let processor = Processor::open(VpeConfig::default(), downstream)?;
/// processor.negotiate(&VideoInfo::new(720, 480).with_interlaced(true))?;
/// let frame = processor.acquire_input().expect("input buffer");
/// // ... fill the frame ...
/// processor.push(frame).expect("push");
/// # Ok(())
/// # }
/// ```
pub struct Processor {
    config: VpeConfig,
    device: Arc<dyn VideoDevice>,
    allocator: Arc<dyn DmaAllocator>,
    downstream: Arc<dyn Downstream>,
    inner: Mutex<Inner>,
}

impl Processor {
    /// Builds the element around an open device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` is out of range.
    pub fn new(
        config: VpeConfig,
        device: Arc<dyn VideoDevice>,
        allocator: Arc<dyn DmaAllocator>,
        downstream: Arc<dyn Downstream>,
    ) -> Result<Self> {
        config.validate()?;
        match device.query_capability() {
            Ok(cap) => {
                debug!(
                    driver = %cap.driver,
                    card = %cap.card,
                    bus_info = %cap.bus_info,
                    version = format_args!("{:08x}", cap.version),
                    capabilities = format_args!("{:08x}", cap.capabilities),
                    "Driver capabilities"
                );
                if !cap.is_m2m_mplane() {
                    warn!("Device does not report multi-planar memory-to-memory streaming");
                }
            }
            Err(err) => warn!("Cannot get V4L2 driver capabilities: {err}"),
        }
        Ok(Self {
            config,
            device,
            allocator,
            downstream,
            inner: Mutex::new(Inner {
                state: ElementState::Init,
                input: None,
                crop: None,
                output: None,
                input_pool: None,
                output_pool: None,
                pump: None,
            }),
        })
    }

    /// Opens the configured device node and allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the device or DMA heap cannot be opened.
    pub fn open(config: VpeConfig, downstream: Arc<dyn Downstream>) -> Result<Self> {
        let device = V4l2Device::open(&config.device)?;
        let allocator = config.allocator.build()?;
        Self::new(config, Arc::new(device), allocator, downstream)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ElementState {
        self.lock().state
    }

    pub fn output_info(&self) -> Option<OutputInfo> {
        self.lock().output
    }

    pub fn is_passthrough(&self) -> bool {
        self.lock().output.is_some_and(|info| info.passthrough)
    }

    /// Crop rectangle currently applied to the input.
    pub fn input_crop(&self) -> Option<Crop> {
        self.lock().crop
    }

    pub fn input_pool(&self) -> Option<BufferPool> {
        self.lock().input_pool.clone()
    }

    pub fn output_pool(&self) -> Option<BufferPool> {
        self.lock().output_pool.clone()
    }

    /// Hands out an input buffer for upstream to fill.
    ///
    /// Creates the submission pool on first use and blocks until a buffer is
    /// free. Frames pushed through [`MediaElement::push`] must come from here.
    ///
    /// # Errors
    ///
    /// - [`FlowError::NotNegotiated`] before [`MediaElement::negotiate`]
    /// - [`FlowError::Flushing`] if the wait was ended by a flush or shutdown
    /// - [`FlowError::Error`] after teardown or if the device rejects the format
    pub fn acquire_input(&self) -> core::result::Result<VpeBuffer, FlowError> {
        let pool = {
            let mut inner = self.lock();
            if inner.state == ElementState::Deinit {
                return Err(FlowError::Error);
            }
            if let Err(err) = self.init_input(&mut inner) {
                error!("Failed to set up input: {err}");
                return Err(match err {
                    Error::NotNegotiated => FlowError::NotNegotiated,
                    _ => FlowError::Error,
                });
            }
            inner.input_pool.clone()
        };
        pool.and_then(|pool| pool.get()).ok_or(FlowError::Flushing)
    }

    /// Applies a pipeline state change.
    pub fn change_state(&self, transition: StateChange) {
        let mut inner = self.lock();
        debug!(?transition, "Changing state");
        match transition {
            StateChange::NullToReady => inner.state = ElementState::Init,
            StateChange::PausedToReady => {
                if let Some(pool) = &inner.input_pool {
                    pool.set_flushing(true);
                }
            }
            StateChange::ReadyToNull => {
                inner.state = ElementState::Deinit;
                self.teardown(&mut inner);
            }
            StateChange::ReadyToPaused
            | StateChange::PausedToPlaying
            | StateChange::PlayingToPaused => {}
        }
    }

    fn init_input(&self, inner: &mut Inner) -> Result<()> {
        if inner.input_pool.is_some() {
            return Ok(());
        }
        let info = inner.input.ok_or(Error::NotNegotiated)?;
        let policy = self.config.interlace_policy;
        let field = match (info.interlaced, policy) {
            (false, _) => Field::None,
            (true, InterlacePolicy::FieldAlternate) => Field::Alternate,
            (true, InterlacePolicy::SequentialTopBottom) => Field::SeqTb,
        };
        let height = if field == Field::Alternate {
            info.height / 2
        } else {
            info.height
        };
        let format = self.device.set_format(&FormatRequest {
            buf_type: BufferType::VideoOutputMplane,
            format: PixelFormat::Nv12,
            width: info.width,
            height,
            field,
        })?;
        debug!(
            width = format.width,
            height = format.height,
            field = ?format.field,
            planes = ?format.planes,
            "Input format set"
        );
        if let Some(crop) = inner.crop
            && crop.width != 0
        {
            self.device
                .set_crop(BufferType::VideoOutputMplane, &crop)?;
        }
        let settings = PoolSettings::submission(
            self.config.num_input_buffers as usize,
            PixelFormat::Nv12,
            info.width,
            info.height,
        )
        .with_interlace_policy(policy);
        inner.input_pool = Some(BufferPool::new(settings, self.allocator.as_ref())?);
        Ok(())
    }

    fn set_output_info(&self, inner: &mut Inner) -> Result<()> {
        let info = inner.input.ok_or(Error::NotNegotiated)?;
        let fixed = self.downstream.allowed_size();
        let passthrough = !(info.interlaced || fixed.is_some());
        let (width, height) = match (fixed, inner.crop) {
            (Some(size), _) => size,
            (None, Some(crop)) if crop.width != 0 && !passthrough => {
                // Interlaced sources report the crop height per field.
                let height = if info.interlaced {
                    crop.height * 2
                } else {
                    crop.height
                };
                (crop.width, height)
            }
            _ => (info.width, info.height),
        };
        if passthrough && let Some(crop) = inner.crop {
            self.downstream.event(&Event::Crop(crop.into()));
        }
        let output = OutputInfo {
            format: PixelFormat::Nv12,
            width,
            height,
            framerate: info.framerate,
            pixel_aspect_ratio: info.pixel_aspect_ratio,
            passthrough,
        };
        info!(
            width,
            height,
            passthrough,
            "Output format {}x{} NV12",
            width,
            height
        );
        inner.output = Some(output);
        Ok(())
    }

    fn init_output(&self, inner: &mut Inner) -> Result<()> {
        if inner.output_pool.is_some() {
            return Ok(());
        }
        let output = inner.output.ok_or(Error::NotNegotiated)?;
        let format = self.device.set_format(&FormatRequest {
            buf_type: BufferType::VideoCaptureMplane,
            format: PixelFormat::Nv12,
            width: output.width,
            height: output.height,
            field: Field::Any,
        })?;
        debug!(
            width = format.width,
            height = format.height,
            planes = ?format.planes,
            "Output format set"
        );
        let settings = PoolSettings::capture(
            self.config.num_output_buffers as usize,
            PixelFormat::Nv12,
            output.width,
            output.height,
        );
        inner.output_pool = Some(BufferPool::new(settings, self.allocator.as_ref())?);
        Ok(())
    }

    fn start(&self, inner: &mut Inner) -> Result<()> {
        self.init_input(inner)?;
        self.set_output_info(inner)?;
        self.init_output(inner)?;
        self.set_streaming(inner, true)?;
        inner.state = ElementState::Active;
        Ok(())
    }

    fn set_streaming(&self, inner: &mut Inner, streaming: bool) -> Result<()> {
        let interlaced = inner.input.is_some_and(|info| info.interlaced);
        if let Some(pool) = &inner.input_pool {
            pool.set_streaming(self.device.as_ref(), streaming, interlaced)?;
        }
        let Some(output_pool) = inner.output_pool.clone() else {
            return Ok(());
        };
        if !streaming && let Some(mut pump) = inner.pump.take() {
            pump.stop();
        }
        output_pool.set_streaming(self.device.as_ref(), streaming, false)?;
        if streaming && inner.pump.is_none() {
            inner.pump = Some(OutputPump::start(
                output_pool,
                inner.input_pool.clone(),
                self.downstream.clone(),
                self.config.poll_interval(),
            )?);
        }
        Ok(())
    }

    fn teardown(&self, inner: &mut Inner) {
        if let Some(mut pump) = inner.pump.take() {
            pump.stop();
        }
        if let Err(err) = self.set_streaming(inner, false) {
            error!("Failed to stop streaming: {err}");
        }
        if let Some(pool) = inner.input_pool.take() {
            pool.destroy();
        }
        if let Some(pool) = inner.output_pool.take() {
            pool.destroy();
        }
        inner.input = None;
        inner.output = None;
        inner.crop = None;
        debug!("Processor torn down");
    }
}

impl MediaElement for Processor {
    fn negotiate(&self, info: &VideoInfo) -> Result<()> {
        if info.format != PixelFormat::Nv12 {
            return Err(Error::UnsupportedFormat(info.format.to_string()));
        }
        let mut inner = self.lock();
        if let Some(current) = inner.input {
            if current == *info {
                return Ok(());
            }
            if (current.width, current.height) != (info.width, info.height) {
                warn!("Dynamic resolution change is not supported");
                return Err(Error::ResolutionChange {
                    from: (current.width, current.height),
                    to: (info.width, info.height),
                });
            }
        }
        debug!(
            width = info.width,
            height = info.height,
            interlaced = info.interlaced,
            "Input format negotiated"
        );
        inner.input = Some(*info);
        Ok(())
    }

    fn push(&self, buffer: VpeBuffer) -> FlowResult {
        let pool = {
            let mut inner = self.lock();
            if inner.state == ElementState::Deinit {
                return Err(FlowError::Error);
            }
            if inner.state != ElementState::Active
                && let Err(err) = self.start(&mut inner)
            {
                error!("Failed to start processing: {err}");
                return Err(match err {
                    Error::NotNegotiated => FlowError::NotNegotiated,
                    _ => FlowError::Error,
                });
            }
            if inner.output.is_some_and(|info| info.passthrough) {
                None
            } else {
                inner.input_pool.clone()
            }
        };
        let Some(pool) = pool else {
            return self.downstream.push(buffer);
        };
        if !pool.owns(&buffer) {
            warn!("Buffers not allocated by this element are not supported, dropping");
            return Ok(());
        }
        match pool.queue(buffer) {
            Ok(_) => Ok(()),
            Err(Error::NotStreaming | Error::ShuttingDown) => Err(FlowError::Flushing),
            Err(err) => {
                error!("Failed to queue input buffer: {err}");
                Err(FlowError::Error)
            }
        }
    }

    fn event(&self, event: Event) -> bool {
        debug!(?event, "Event");
        match &event {
            Event::Crop(request) => {
                let mut inner = self.lock();
                let (width, height) = inner
                    .input
                    .map_or((0, 0), |info| (info.width, info.height));
                let crop = request.resolve(width, height);
                inner.crop = Some(crop);
                if inner.state != ElementState::Active
                    && inner.input_pool.is_some()
                    && let Err(err) = self
                        .device
                        .set_crop(BufferType::VideoOutputMplane, &crop)
                {
                    error!("Failed to set crop: {err}");
                }
                return true;
            }
            Event::FlushStart | Event::FlushStop => {
                if let Some(pool) = self.input_pool() {
                    pool.set_flushing(event == Event::FlushStart);
                }
            }
            Event::Segment | Event::Eos | Event::Custom(_) => {}
        }
        self.downstream.event(&event)
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        let mut inner = self.lock();
        if inner.state != ElementState::Deinit {
            inner.state = ElementState::Deinit;
            self.teardown(&mut inner);
        }
    }
}
