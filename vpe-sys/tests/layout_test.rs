// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Pins the structure layouts and ioctl request codes to the kernel ABI.

use std::mem::{offset_of, size_of};

use vpe_sys::*;

#[test]
fn fixed_size_structures() {
    assert_eq!(size_of::<v4l2_capability>(), 104);
    assert_eq!(size_of::<v4l2_plane_pix_format>(), 20);
    assert_eq!(size_of::<v4l2_pix_format_mplane>(), 192);
    assert_eq!(size_of::<v4l2_requestbuffers>(), 20);
    assert_eq!(size_of::<v4l2_crop>(), 20);
    assert_eq!(size_of::<dma_heap_allocation_data>(), 24);
}

#[cfg(target_pointer_width = "64")]
#[test]
fn pointer_sized_structures() {
    assert_eq!(size_of::<v4l2_plane>(), 64);
    assert_eq!(offset_of!(v4l2_plane, data_offset), 16);
    assert_eq!(size_of::<v4l2_buffer>(), 88);
    assert_eq!(offset_of!(v4l2_buffer, timestamp), 24);
    assert_eq!(offset_of!(v4l2_buffer, sequence), 56);
    assert_eq!(offset_of!(v4l2_buffer, m), 64);
    assert_eq!(offset_of!(v4l2_buffer, length), 72);
    assert_eq!(size_of::<v4l2_format>(), 208);
    assert_eq!(offset_of!(v4l2_format, fmt), 8);
}

#[cfg(target_pointer_width = "64")]
#[test]
fn request_codes_match_kernel_headers() {
    assert_eq!(
        nix::request_code_read!(b'V', 0, size_of::<v4l2_capability>()) as u32,
        0x8068_5600
    );
    assert_eq!(
        nix::request_code_readwrite!(b'V', 5, size_of::<v4l2_format>()) as u32,
        0xc0d0_5605
    );
    assert_eq!(
        nix::request_code_readwrite!(b'V', 8, size_of::<v4l2_requestbuffers>()) as u32,
        0xc014_5608
    );
    assert_eq!(
        nix::request_code_readwrite!(b'V', 15, size_of::<v4l2_buffer>()) as u32,
        0xc058_560f
    );
    assert_eq!(
        nix::request_code_readwrite!(b'V', 17, size_of::<v4l2_buffer>()) as u32,
        0xc058_5611
    );
    assert_eq!(
        nix::request_code_write!(b'V', 18, size_of::<nix::libc::c_int>()) as u32,
        0x4004_5612
    );
    assert_eq!(
        nix::request_code_write!(b'V', 60, size_of::<v4l2_crop>()) as u32,
        0x4014_563c
    );
    assert_eq!(
        nix::request_code_readwrite!(b'H', 0, size_of::<dma_heap_allocation_data>()) as u32,
        0xc018_4800
    );
}

#[test]
fn fourcc_codes() {
    assert_eq!(V4L2_PIX_FMT_NV12, 0x3231_564e);
    assert_eq!(V4L2_PIX_FMT_YUYV, 0x5659_5559);
    assert_eq!(V4L2_PIX_FMT_ABGR32, 0x3432_5241);
}
