// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! In-process model of a memory-to-memory V4L2 driver.
//!
//! [`EmulatedDevice`] follows the queue rules of the kernel API closely enough
//! to exercise the pools without hardware: buffers must be registered before
//! they are queued, a slot can be queued at most once, an empty done-queue
//! reports EAGAIN and `STREAMOFF` hands every buffer back. Each call is
//! recorded as an [`IoctlCall`].
//!
//! Frames are processed either on demand ([`EmulatedDevice::process`],
//! [`EmulatedDevice::complete`]) or automatically on every queue call when
//! built with [`EmulatedDevice::with_auto_process`]. Processing pairs the
//! oldest queued output buffer with the oldest queued capture buffer and
//! copies the timestamp across, as the VPE driver does.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use nix::errno::Errno;

use super::{
    BufferType, Capability, DequeuedBuffer, FormatRequest, NegotiatedFormat, PlaneFormat,
    QueueRequest, VideoDevice,
};
use crate::{Crop, Error, Field, PixelFormat, Result};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlCall {
    QueryCap,
    SetFormat(FormatRequest),
    SetCrop {
        buf_type: BufferType,
        crop: Crop,
    },
    RequestBuffers {
        buf_type: BufferType,
        count: u32,
    },
    QueryBuffer {
        buf_type: BufferType,
        index: u32,
    },
    Queue {
        buf_type: BufferType,
        index: u32,
        field: Field,
        timestamp: Option<Duration>,
        data_offsets: Vec<u32>,
    },
    Dequeue {
        buf_type: BufferType,
        index: u32,
    },
    StreamOn(BufferType),
    StreamOff(BufferType),
}

#[derive(Debug, Default)]
struct QueueState {
    registered: u32,
    streaming: bool,
    format: Option<FormatRequest>,
    queued: VecDeque<QueueRequest>,
    done: VecDeque<DequeuedBuffer>,
}

impl QueueState {
    fn holds(&self, index: u32) -> bool {
        self.queued.iter().any(|q| q.index == index) || self.done.iter().any(|d| d.index == index)
    }
}

#[derive(Debug, Default)]
struct EmulatorState {
    output: QueueState,
    capture: QueueState,
    calls: Vec<IoctlCall>,
    max_buffers: Option<u32>,
    queue_budget: Option<usize>,
    auto_process: bool,
    sequence: u32,
}

impl EmulatorState {
    fn queue(&mut self, buf_type: BufferType) -> &mut QueueState {
        match buf_type {
            BufferType::VideoOutputMplane => &mut self.output,
            BufferType::VideoCaptureMplane => &mut self.capture,
        }
    }

    fn process_one(&mut self) -> bool {
        if !self.output.streaming || !self.capture.streaming {
            return false;
        }
        if self.output.queued.is_empty() || self.capture.queued.is_empty() {
            return false;
        }
        let (Some(input), Some(output)) =
            (self.output.queued.pop_front(), self.capture.queued.pop_front())
        else {
            return false;
        };
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        self.output.done.push_back(completed(&input, sequence));
        let mut frame = completed(&output, sequence);
        frame.timestamp = input.timestamp;
        frame.field = Field::None;
        self.capture.done.push_back(frame);
        true
    }
}

fn completed(request: &QueueRequest, sequence: u32) -> DequeuedBuffer {
    DequeuedBuffer {
        index: request.index,
        field: request.field,
        timestamp: request.timestamp,
        sequence,
        flags: vpe_sys::V4L2_BUF_FLAG_DONE,
        bytes_used: request
            .planes
            .iter()
            .map(|p| p.length.saturating_sub(p.data_offset))
            .collect(),
    }
}

fn plane_formats(format: &FormatRequest) -> Vec<PlaneFormat> {
    let (w, h) = (format.width, format.height);
    match format.format {
        PixelFormat::Nv12 => vec![
            PlaneFormat {
                size_image: w * h,
                bytes_per_line: w,
            },
            PlaneFormat {
                size_image: w * h / 2,
                bytes_per_line: w,
            },
        ],
        PixelFormat::Yuyv => vec![PlaneFormat {
            size_image: w * h * 2,
            bytes_per_line: w * 2,
        }],
        PixelFormat::Argb32 => vec![PlaneFormat {
            size_image: w * h * 4,
            bytes_per_line: w * 4,
        }],
    }
}

/// Emulated VPE device; clones share the same driver state.
#[derive(Debug, Clone, Default)]
pub struct EmulatedDevice {
    state: Arc<Mutex<EmulatorState>>,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of slots `REQBUFS` grants.
    pub fn with_max_buffers(self, max: u32) -> Self {
        self.lock().max_buffers = Some(max);
        self
    }

    /// Processes frames as soon as both queues have a buffer.
    pub fn with_auto_process(self, auto: bool) -> Self {
        self.lock().auto_process = auto;
        self
    }

    /// Lets `successes` more `QBUF` calls succeed, then fails every following one with EINVAL.
    pub fn fail_queue_after(&self, successes: usize) {
        self.lock().queue_budget = Some(successes);
    }

    pub fn clear_failures(&self) {
        self.lock().queue_budget = None;
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<IoctlCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// `QBUF` calls recorded for one queue, oldest first.
    pub fn queue_calls(&self, buf_type: BufferType) -> Vec<IoctlCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, IoctlCall::Queue { buf_type: t, .. } if *t == buf_type))
            .cloned()
            .collect()
    }

    /// Indices currently queued and not yet completed.
    pub fn pending(&self, buf_type: BufferType) -> Vec<u32> {
        self.lock()
            .queue(buf_type)
            .queued
            .iter()
            .map(|q| q.index)
            .collect()
    }

    pub fn registered(&self, buf_type: BufferType) -> u32 {
        self.lock().queue(buf_type).registered
    }

    pub fn is_streaming(&self, buf_type: BufferType) -> bool {
        self.lock().queue(buf_type).streaming
    }

    /// Completes one specific queued buffer, regardless of the other queue.
    ///
    /// Returns false if the index is not queued.
    pub fn complete(&self, buf_type: BufferType, index: u32) -> bool {
        let mut state = self.lock();
        let sequence = state.sequence;
        let queue = state.queue(buf_type);
        let Some(position) = queue.queued.iter().position(|q| q.index == index) else {
            return false;
        };
        let Some(request) = queue.queued.remove(position) else {
            return false;
        };
        queue.done.push_back(completed(&request, sequence));
        state.sequence = sequence.wrapping_add(1);
        true
    }

    /// Processes as many output/capture pairs as possible.
    pub fn process(&self) -> usize {
        let mut state = self.lock();
        let mut processed = 0;
        while state.process_one() {
            processed += 1;
        }
        processed
    }

    fn lock(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fail(op: &'static str, errno: Errno) -> Error {
    Error::Ioctl { op, errno }
}

impl VideoDevice for EmulatedDevice {
    fn try_clone(&self) -> Result<Box<dyn VideoDevice>> {
        Ok(Box::new(self.clone()))
    }

    fn query_capability(&self) -> Result<Capability> {
        self.lock().calls.push(IoctlCall::QueryCap);
        let caps = vpe_sys::V4L2_CAP_VIDEO_M2M_MPLANE | vpe_sys::V4L2_CAP_STREAMING;
        Ok(Capability {
            driver: "vpe-emulated".to_string(),
            card: "Emulated VPE".to_string(),
            bus_info: "platform:emulated".to_string(),
            version: 0,
            capabilities: caps | vpe_sys::V4L2_CAP_DEVICE_CAPS,
            device_caps: caps,
        })
    }

    fn set_format(&self, request: &FormatRequest) -> Result<NegotiatedFormat> {
        let mut state = self.lock();
        state.calls.push(IoctlCall::SetFormat(*request));
        let queue = state.queue(request.buf_type);
        if queue.registered > 0 {
            return Err(fail("VIDIOC_S_FMT", Errno::EBUSY));
        }
        queue.format = Some(*request);
        Ok(NegotiatedFormat {
            width: request.width,
            height: request.height,
            fourcc: request.format.fourcc(),
            field: request.field,
            planes: plane_formats(request),
        })
    }

    fn set_crop(&self, buf_type: BufferType, crop: &Crop) -> Result<()> {
        self.lock().calls.push(IoctlCall::SetCrop {
            buf_type,
            crop: *crop,
        });
        Ok(())
    }

    fn request_buffers(&self, buf_type: BufferType, count: u32) -> Result<u32> {
        let mut state = self.lock();
        state.calls.push(IoctlCall::RequestBuffers { buf_type, count });
        let granted = state.max_buffers.map_or(count, |max| count.min(max));
        let queue = state.queue(buf_type);
        if queue.streaming {
            return Err(fail("VIDIOC_REQBUFS", Errno::EBUSY));
        }
        queue.registered = granted;
        queue.queued.clear();
        queue.done.clear();
        Ok(granted)
    }

    fn query_buffer(
        &self,
        buf_type: BufferType,
        index: u32,
        num_planes: usize,
    ) -> Result<Vec<u32>> {
        let mut state = self.lock();
        state.calls.push(IoctlCall::QueryBuffer { buf_type, index });
        let queue = state.queue(buf_type);
        if index >= queue.registered {
            return Err(fail("VIDIOC_QUERYBUF", Errno::EINVAL));
        }
        let lengths = queue
            .format
            .as_ref()
            .map(|format| format.format.frame_size(format.width, format.height) as u32)
            .unwrap_or(0);
        Ok(vec![lengths; num_planes])
    }

    fn queue_buffer(&self, request: &QueueRequest) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(IoctlCall::Queue {
            buf_type: request.buf_type,
            index: request.index,
            field: request.field,
            timestamp: request.timestamp,
            data_offsets: request.planes.iter().map(|p| p.data_offset).collect(),
        });
        if let Some(budget) = state.queue_budget.as_mut() {
            if *budget == 0 {
                return Err(fail("VIDIOC_QBUF", Errno::EINVAL));
            }
            *budget -= 1;
        }
        let queue = state.queue(request.buf_type);
        if request.index >= queue.registered || queue.holds(request.index) {
            return Err(fail("VIDIOC_QBUF", Errno::EINVAL));
        }
        queue.queued.push_back(request.clone());
        if state.auto_process {
            while state.process_one() {}
        }
        Ok(())
    }

    fn dequeue_buffer(&self, buf_type: BufferType, _num_planes: usize) -> Result<DequeuedBuffer> {
        let mut state = self.lock();
        let queue = state.queue(buf_type);
        if !queue.streaming {
            return Err(fail("VIDIOC_DQBUF", Errno::EINVAL));
        }
        let Some(buffer) = queue.done.pop_front() else {
            return Err(fail("VIDIOC_DQBUF", Errno::EAGAIN));
        };
        state.calls.push(IoctlCall::Dequeue {
            buf_type,
            index: buffer.index,
        });
        Ok(buffer)
    }

    fn stream_on(&self, buf_type: BufferType) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(IoctlCall::StreamOn(buf_type));
        let queue = state.queue(buf_type);
        if queue.registered == 0 {
            return Err(fail("VIDIOC_STREAMON", Errno::EINVAL));
        }
        queue.streaming = true;
        if state.auto_process {
            while state.process_one() {}
        }
        Ok(())
    }

    fn stream_off(&self, buf_type: BufferType) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(IoctlCall::StreamOff(buf_type));
        let queue = state.queue(buf_type);
        queue.streaming = false;
        queue.queued.clear();
        queue.done.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PlaneRef;

    fn request(buf_type: BufferType, index: u32, timestamp: Option<Duration>) -> QueueRequest {
        QueueRequest {
            buf_type,
            index,
            field: Field::Any,
            timestamp,
            planes: vec![PlaneRef {
                fd: -1,
                length: 64,
                data_offset: 0,
                bytes_used: 0,
            }],
        }
    }

    #[test]
    fn empty_done_queue_is_eagain() {
        let device = EmulatedDevice::new();
        device
            .request_buffers(BufferType::VideoCaptureMplane, 2)
            .unwrap();
        device.stream_on(BufferType::VideoCaptureMplane).unwrap();
        let err = device
            .dequeue_buffer(BufferType::VideoCaptureMplane, 1)
            .unwrap_err();
        assert!(err.is_try_again());
    }

    #[test]
    fn slot_cannot_be_queued_twice() {
        let device = EmulatedDevice::new();
        device
            .request_buffers(BufferType::VideoOutputMplane, 2)
            .unwrap();
        let req = request(BufferType::VideoOutputMplane, 1, None);
        device.queue_buffer(&req).unwrap();
        assert!(device.queue_buffer(&req).is_err());
        assert!(
            device
                .queue_buffer(&request(BufferType::VideoOutputMplane, 2, None))
                .is_err()
        );
    }

    #[test]
    fn processing_copies_timestamp_to_capture() {
        let device = EmulatedDevice::new();
        for buf_type in [BufferType::VideoOutputMplane, BufferType::VideoCaptureMplane] {
            device.request_buffers(buf_type, 4).unwrap();
            device.stream_on(buf_type).unwrap();
        }
        let ts = Some(Duration::from_millis(40));
        device
            .queue_buffer(&request(BufferType::VideoOutputMplane, 0, ts))
            .unwrap();
        device
            .queue_buffer(&request(BufferType::VideoCaptureMplane, 3, None))
            .unwrap();
        assert_eq!(device.process(), 1);
        let frame = device
            .dequeue_buffer(BufferType::VideoCaptureMplane, 1)
            .unwrap();
        assert_eq!(frame.index, 3);
        assert_eq!(frame.timestamp, ts);
        let input = device
            .dequeue_buffer(BufferType::VideoOutputMplane, 1)
            .unwrap();
        assert_eq!(input.index, 0);
    }

    #[test]
    fn stream_off_returns_everything() {
        let device = EmulatedDevice::new();
        device
            .request_buffers(BufferType::VideoOutputMplane, 2)
            .unwrap();
        device.stream_on(BufferType::VideoOutputMplane).unwrap();
        device
            .queue_buffer(&request(BufferType::VideoOutputMplane, 0, None))
            .unwrap();
        device.stream_off(BufferType::VideoOutputMplane).unwrap();
        assert!(device.pending(BufferType::VideoOutputMplane).is_empty());
        device
            .queue_buffer(&request(BufferType::VideoOutputMplane, 0, None))
            .unwrap();
    }
}
