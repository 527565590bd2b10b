// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! ioctl entry points.
//!
//! Each function has the signature `unsafe fn(fd: c_int, data: *mut T) -> nix::Result<c_int>`
//! (or `*const T` for write-only requests), as generated by the `nix` macros.

use nix::libc::c_int;

use crate::{
    dma_heap_allocation_data, v4l2_buffer, v4l2_capability, v4l2_crop, v4l2_format,
    v4l2_requestbuffers,
};

nix::ioctl_read!(
    /// `VIDIOC_QUERYCAP`
    vidioc_querycap,
    b'V',
    0,
    v4l2_capability
);
nix::ioctl_readwrite!(
    /// `VIDIOC_G_FMT`
    vidioc_g_fmt,
    b'V',
    4,
    v4l2_format
);
nix::ioctl_readwrite!(
    /// `VIDIOC_S_FMT`
    vidioc_s_fmt,
    b'V',
    5,
    v4l2_format
);
nix::ioctl_readwrite!(
    /// `VIDIOC_REQBUFS`
    vidioc_reqbufs,
    b'V',
    8,
    v4l2_requestbuffers
);
nix::ioctl_readwrite!(
    /// `VIDIOC_QUERYBUF`
    vidioc_querybuf,
    b'V',
    9,
    v4l2_buffer
);
nix::ioctl_readwrite!(
    /// `VIDIOC_QBUF`
    vidioc_qbuf,
    b'V',
    15,
    v4l2_buffer
);
nix::ioctl_readwrite!(
    /// `VIDIOC_DQBUF`
    vidioc_dqbuf,
    b'V',
    17,
    v4l2_buffer
);
nix::ioctl_write_ptr!(
    /// `VIDIOC_STREAMON`
    vidioc_streamon,
    b'V',
    18,
    c_int
);
nix::ioctl_write_ptr!(
    /// `VIDIOC_STREAMOFF`
    vidioc_streamoff,
    b'V',
    19,
    c_int
);
nix::ioctl_readwrite!(
    /// `VIDIOC_G_CROP`
    vidioc_g_crop,
    b'V',
    59,
    v4l2_crop
);
nix::ioctl_write_ptr!(
    /// `VIDIOC_S_CROP`
    vidioc_s_crop,
    b'V',
    60,
    v4l2_crop
);
nix::ioctl_readwrite!(
    /// `DMA_HEAP_IOCTL_ALLOC`
    dma_heap_ioctl_alloc,
    b'H',
    0,
    dma_heap_allocation_data
);
