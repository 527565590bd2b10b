// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! [`VideoDevice`] over a real V4L2 device node.

use std::{
    fs::OpenOptions,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    time::Duration,
};

use nix::libc::{self, c_int, suseconds_t, time_t, timeval};
use tracing::{debug, trace};
use vpe_sys::{
    VIDEO_MAX_PLANES, V4L2_MEMORY_DMABUF, v4l2_buffer, v4l2_buffer_m, v4l2_capability, v4l2_crop,
    v4l2_format, v4l2_format_fmt, v4l2_pix_format_mplane, v4l2_plane, v4l2_plane_m,
    v4l2_requestbuffers,
};

use super::{
    BufferType, Capability, DequeuedBuffer, FormatRequest, NegotiatedFormat, PlaneFormat,
    QueueRequest, VideoDevice,
};
use crate::{Crop, Error, Field, Result};

/// `tv_sec` value marking a timestamp the driver must ignore.
const INVALID_TIMESTAMP_SEC: time_t = -1;

/// An open V4L2 device node.
///
/// The node is opened `O_RDWR | O_NONBLOCK`; duplicates made with
/// [`VideoDevice::try_clone`] share that status.
#[derive(Debug)]
pub struct V4l2Device {
    fd: OwnedFd,
}

impl V4l2Device {
    /// Opens a device node such as `/dev/video0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the node cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vpe::device::{V4l2Device, VideoDevice};
    ///
    /// # fn main() -> Result<(), vpe::Error> {
    /// let device = V4l2Device::open("/dev/video0")?;
    /// let caps = device.query_capability()?;
    /// println!("{} on {}", caps.card, caps.bus_info);
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        debug!("Opened {}", path.display());
        Ok(Self { fd: file.into() })
    }

    /// Wraps an already open descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for V4l2Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub(crate) fn timestamp_to_timeval(timestamp: Option<Duration>) -> timeval {
    match timestamp {
        Some(ts) => timeval {
            tv_sec: ts.as_secs() as time_t,
            tv_usec: ts.subsec_micros() as suseconds_t,
        },
        None => timeval {
            tv_sec: INVALID_TIMESTAMP_SEC,
            tv_usec: 0,
        },
    }
}

pub(crate) fn timeval_to_timestamp(tv: &timeval) -> Option<Duration> {
    if tv.tv_sec < 0 {
        return None;
    }
    let micros = tv.tv_usec.clamp(0, 999_999) as u32;
    Some(Duration::new(tv.tv_sec as u64, micros * 1_000))
}

fn empty_planes() -> [v4l2_plane; VIDEO_MAX_PLANES] {
    [v4l2_plane::default(); VIDEO_MAX_PLANES]
}

impl VideoDevice for V4l2Device {
    fn try_clone(&self) -> Result<Box<dyn VideoDevice>> {
        Ok(Box::new(Self {
            fd: self.fd.try_clone()?,
        }))
    }

    fn query_capability(&self) -> Result<Capability> {
        let mut cap = v4l2_capability::default();
        // SAFETY: `cap` is a valid, writable v4l2_capability.
        Error::from_ioctl("VIDIOC_QUERYCAP", unsafe {
            vpe_sys::vidioc_querycap(self.raw(), &mut cap)
        })?;
        Ok(Capability {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus_info: c_string(&cap.bus_info),
            version: cap.version,
            capabilities: cap.capabilities,
            device_caps: cap.device_caps,
        })
    }

    fn set_format(&self, request: &FormatRequest) -> Result<NegotiatedFormat> {
        let mut format = v4l2_format {
            type_: request.buf_type.as_raw(),
            fmt: v4l2_format_fmt {
                pix_mp: v4l2_pix_format_mplane {
                    width: request.width,
                    height: request.height,
                    pixelformat: request.format.fourcc(),
                    field: request.field.as_raw(),
                    ..Default::default()
                },
            },
        };
        // SAFETY: `format` is fully initialised and outlives the call.
        Error::from_ioctl("VIDIOC_S_FMT", unsafe {
            vpe_sys::vidioc_s_fmt(self.raw(), &mut format)
        })?;
        // SAFETY: multi-planar buffer types use the `pix_mp` member.
        let pix = unsafe { format.fmt.pix_mp };
        let plane_fmt = pix.plane_fmt;
        let num_planes = (pix.num_planes as usize).min(VIDEO_MAX_PLANES);
        let planes = plane_fmt[..num_planes]
            .iter()
            .map(|plane| PlaneFormat {
                size_image: plane.sizeimage,
                bytes_per_line: plane.bytesperline,
            })
            .collect();
        Ok(NegotiatedFormat {
            width: pix.width,
            height: pix.height,
            fourcc: pix.pixelformat,
            field: Field::from_raw(pix.field),
            planes,
        })
    }

    fn set_crop(&self, buf_type: BufferType, crop: &Crop) -> Result<()> {
        let request = v4l2_crop {
            type_: buf_type.as_raw(),
            c: crop.to_rect(),
        };
        // SAFETY: `request` is a valid v4l2_crop for the duration of the call.
        Error::from_ioctl("VIDIOC_S_CROP", unsafe {
            vpe_sys::vidioc_s_crop(self.raw(), &request)
        })
    }

    fn request_buffers(&self, buf_type: BufferType, count: u32) -> Result<u32> {
        let mut request = v4l2_requestbuffers {
            count,
            type_: buf_type.as_raw(),
            memory: V4L2_MEMORY_DMABUF,
            ..Default::default()
        };
        // SAFETY: `request` is a valid, writable v4l2_requestbuffers.
        Error::from_ioctl("VIDIOC_REQBUFS", unsafe {
            vpe_sys::vidioc_reqbufs(self.raw(), &mut request)
        })?;
        Ok(request.count)
    }

    fn query_buffer(
        &self,
        buf_type: BufferType,
        index: u32,
        num_planes: usize,
    ) -> Result<Vec<u32>> {
        let num_planes = num_planes.min(VIDEO_MAX_PLANES);
        let mut planes = empty_planes();
        let mut buffer = v4l2_buffer {
            index,
            type_: buf_type.as_raw(),
            memory: V4L2_MEMORY_DMABUF,
            length: num_planes as u32,
            m: v4l2_buffer_m {
                planes: planes.as_mut_ptr(),
            },
            ..Default::default()
        };
        // SAFETY: `buffer.m.planes` points at `planes`, which holds at least
        // `buffer.length` entries and lives past the call.
        Error::from_ioctl("VIDIOC_QUERYBUF", unsafe {
            vpe_sys::vidioc_querybuf(self.raw(), &mut buffer)
        })?;
        Ok(planes[..num_planes].iter().map(|p| p.length).collect())
    }

    fn queue_buffer(&self, request: &QueueRequest) -> Result<()> {
        let num_planes = request.planes.len().min(VIDEO_MAX_PLANES);
        let mut planes = empty_planes();
        for (plane, src) in planes.iter_mut().zip(&request.planes) {
            plane.bytesused = src.bytes_used;
            plane.length = src.length;
            plane.data_offset = src.data_offset;
            plane.m = v4l2_plane_m { fd: src.fd };
        }
        let mut buffer = v4l2_buffer {
            index: request.index,
            type_: request.buf_type.as_raw(),
            field: request.field.as_raw(),
            timestamp: timestamp_to_timeval(request.timestamp),
            memory: V4L2_MEMORY_DMABUF,
            length: num_planes as u32,
            m: v4l2_buffer_m {
                planes: planes.as_mut_ptr(),
            },
            ..Default::default()
        };
        trace!(
            index = request.index,
            buf_type = %request.buf_type,
            field = ?request.field,
            "VIDIOC_QBUF"
        );
        // SAFETY: `buffer.m.planes` points at `planes`, which holds
        // `buffer.length` initialised entries and lives past the call.
        Error::from_ioctl("VIDIOC_QBUF", unsafe {
            vpe_sys::vidioc_qbuf(self.raw(), &mut buffer)
        })
    }

    fn dequeue_buffer(&self, buf_type: BufferType, num_planes: usize) -> Result<DequeuedBuffer> {
        let num_planes = num_planes.min(VIDEO_MAX_PLANES);
        let mut planes = empty_planes();
        let mut buffer = v4l2_buffer {
            type_: buf_type.as_raw(),
            memory: V4L2_MEMORY_DMABUF,
            length: num_planes as u32,
            m: v4l2_buffer_m {
                planes: planes.as_mut_ptr(),
            },
            ..Default::default()
        };
        // SAFETY: `buffer.m.planes` points at `planes`, which holds at least
        // `buffer.length` entries and lives past the call.
        Error::from_ioctl("VIDIOC_DQBUF", unsafe {
            vpe_sys::vidioc_dqbuf(self.raw(), &mut buffer)
        })?;
        Ok(DequeuedBuffer {
            index: buffer.index,
            field: Field::from_raw(buffer.field),
            timestamp: timeval_to_timestamp(&buffer.timestamp),
            sequence: buffer.sequence,
            flags: buffer.flags,
            bytes_used: planes[..num_planes].iter().map(|p| p.bytesused).collect(),
        })
    }

    fn stream_on(&self, buf_type: BufferType) -> Result<()> {
        let raw = buf_type.as_raw() as c_int;
        // SAFETY: `raw` is a valid buffer type integer for the duration of the call.
        Error::from_ioctl("VIDIOC_STREAMON", unsafe {
            vpe_sys::vidioc_streamon(self.raw(), &raw)
        })
    }

    fn stream_off(&self, buf_type: BufferType) -> Result<()> {
        let raw = buf_type.as_raw() as c_int;
        // SAFETY: `raw` is a valid buffer type integer for the duration of the call.
        Error::from_ioctl("VIDIOC_STREAMOFF", unsafe {
            vpe_sys::vidioc_streamoff(self.raw(), &raw)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timestamp_uses_sentinel() {
        let tv = timestamp_to_timeval(None);
        assert_eq!(tv.tv_sec, -1);
        assert_eq!(timeval_to_timestamp(&tv), None);
    }

    #[test]
    fn timestamps_keep_microseconds() {
        let ts = Duration::new(12, 345_678_000);
        let tv = timestamp_to_timeval(Some(ts));
        assert_eq!(tv.tv_sec, 12);
        assert_eq!(tv.tv_usec, 345_678);
        assert_eq!(timeval_to_timestamp(&tv), Some(ts));
    }

    #[test]
    fn device_strings_stop_at_nul() {
        let mut raw = [0u8; 16];
        raw[..3].copy_from_slice(b"vpe");
        assert_eq!(c_string(&raw), "vpe");
        assert_eq!(c_string(b"full"), "full");
    }
}
