// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Pixel formats, field orders and negotiated video geometry.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, buffer::PlaneLayout};

/// Pixel formats the VPE path handles.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Two-plane 4:2:0, the only format the accelerator emits.
    #[serde(rename = "NV12")]
    Nv12,
    /// Packed 4:2:2.
    #[serde(rename = "YUYV")]
    Yuyv,
    /// 32-bit with alpha ("AR24").
    #[serde(rename = "AR24")]
    Argb32,
}

impl PixelFormat {
    /// V4L2 fourcc for this format.
    pub fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Nv12 => vpe_sys::V4L2_PIX_FMT_NV12,
            PixelFormat::Yuyv => vpe_sys::V4L2_PIX_FMT_YUYV,
            PixelFormat::Argb32 => vpe_sys::V4L2_PIX_FMT_ABGR32,
        }
    }

    /// Maps a V4L2 fourcc back to a format.
    pub fn from_fourcc(fourcc: u32) -> Option<Self> {
        match fourcc {
            vpe_sys::V4L2_PIX_FMT_NV12 => Some(PixelFormat::Nv12),
            vpe_sys::V4L2_PIX_FMT_YUYV => Some(PixelFormat::Yuyv),
            vpe_sys::V4L2_PIX_FMT_ABGR32 => Some(PixelFormat::Argb32),
            _ => None,
        }
    }

    /// Number of driver-visible planes.
    pub fn num_planes(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuyv | PixelFormat::Argb32 => 1,
        }
    }

    /// Size in bytes of one frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::Argb32 => pixels * 4,
        }
    }

    /// Plane layout of one frame inside a single memory handle.
    ///
    /// Every plane spans the whole allocation; the chroma plane of NV12 starts
    /// right after the luma plane.
    pub fn plane_layouts(self, width: u32, height: u32) -> Vec<PlaneLayout> {
        let length = self.frame_size(width, height) as u32;
        let mut planes = vec![PlaneLayout {
            length,
            data_offset: 0,
        }];
        if self == PixelFormat::Nv12 {
            planes.push(PlaneLayout {
                length,
                data_offset: width * height,
            });
        }
        planes
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Argb32 => "AR24",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NV12" => Ok(PixelFormat::Nv12),
            "YUYV" | "YUY2" => Ok(PixelFormat::Yuyv),
            "AR24" | "ARGB" => Ok(PixelFormat::Argb32),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// V4L2 field order tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Field {
    /// Driver chooses.
    #[default]
    Any,
    /// Progressive.
    None,
    /// Top field only.
    Top,
    /// Bottom field only.
    Bottom,
    /// Both fields interleaved line by line.
    Interlaced,
    /// Top field stored first, then bottom field.
    SeqTb,
    /// Bottom field stored first, then top field.
    SeqBt,
    /// One field per buffer, alternating parity.
    Alternate,
}

impl Field {
    pub fn as_raw(self) -> u32 {
        match self {
            Field::Any => vpe_sys::V4L2_FIELD_ANY,
            Field::None => vpe_sys::V4L2_FIELD_NONE,
            Field::Top => vpe_sys::V4L2_FIELD_TOP,
            Field::Bottom => vpe_sys::V4L2_FIELD_BOTTOM,
            Field::Interlaced => vpe_sys::V4L2_FIELD_INTERLACED,
            Field::SeqTb => vpe_sys::V4L2_FIELD_SEQ_TB,
            Field::SeqBt => vpe_sys::V4L2_FIELD_SEQ_BT,
            Field::Alternate => vpe_sys::V4L2_FIELD_ALTERNATE,
        }
    }

    /// Unknown values map to [`Field::Any`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            vpe_sys::V4L2_FIELD_NONE => Field::None,
            vpe_sys::V4L2_FIELD_TOP => Field::Top,
            vpe_sys::V4L2_FIELD_BOTTOM => Field::Bottom,
            vpe_sys::V4L2_FIELD_INTERLACED => Field::Interlaced,
            vpe_sys::V4L2_FIELD_SEQ_TB => Field::SeqTb,
            vpe_sys::V4L2_FIELD_SEQ_BT => Field::SeqBt,
            vpe_sys::V4L2_FIELD_ALTERNATE => Field::Alternate,
            _ => Field::Any,
        }
    }
}

/// Parity of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldParity {
    Top,
    Bottom,
}

impl FieldParity {
    pub fn opposite(self) -> Self {
        match self {
            FieldParity::Top => FieldParity::Bottom,
            FieldParity::Bottom => FieldParity::Top,
        }
    }
}

impl From<FieldParity> for Field {
    fn from(parity: FieldParity) -> Self {
        match parity {
            FieldParity::Top => Field::Top,
            FieldParity::Bottom => Field::Bottom,
        }
    }
}

/// How interlaced input is handed to the driver.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterlacePolicy {
    /// Each field is a separate driver buffer; one frame uses up to four slots.
    #[default]
    FieldAlternate,
    /// The whole frame is one driver buffer with sequential top/bottom fields.
    SequentialTopBottom,
}

/// Crop rectangle in pixels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crop {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Crop {
    /// Rectangle covering a whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    pub(crate) fn to_rect(self) -> vpe_sys::v4l2_rect {
        vpe_sys::v4l2_rect {
            left: self.left,
            top: self.top,
            width: self.width,
            height: self.height,
        }
    }
}

/// Video geometry negotiated with the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub interlaced: bool,
    /// Frames per second as numerator/denominator.
    pub framerate: (i32, i32),
    /// Pixel aspect ratio as numerator/denominator.
    pub pixel_aspect_ratio: (i32, i32),
}

impl VideoInfo {
    /// Progressive NV12 of the given size, unknown rate, square pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            format: PixelFormat::Nv12,
            width,
            height,
            interlaced: false,
            framerate: (0, 1),
            pixel_aspect_ratio: (1, 1),
        }
    }

    pub fn with_interlaced(mut self, interlaced: bool) -> Self {
        self.interlaced = interlaced;
        self
    }

    pub fn with_framerate(mut self, numerator: i32, denominator: i32) -> Self {
        self.framerate = (numerator, denominator);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_follow_format() {
        assert_eq!(PixelFormat::Nv12.frame_size(800, 600), 720_000);
        assert_eq!(PixelFormat::Yuyv.frame_size(800, 600), 960_000);
        assert_eq!(PixelFormat::Argb32.frame_size(800, 600), 1_920_000);
    }

    #[test]
    fn nv12_chroma_follows_luma() {
        let planes = PixelFormat::Nv12.plane_layouts(720, 480);
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[0].data_offset, 0);
        assert_eq!(planes[1].data_offset, 720 * 480);
        assert!(planes.iter().all(|p| p.length == 720 * 480 * 3 / 2));
        assert_eq!(PixelFormat::Yuyv.plane_layouts(720, 480).len(), 1);
    }

    #[test]
    fn fourcc_and_names() {
        for format in [PixelFormat::Nv12, PixelFormat::Yuyv, PixelFormat::Argb32] {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
            assert_eq!(format.to_string().parse::<PixelFormat>().unwrap(), format);
        }
        assert!("I420".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn field_raw_values() {
        assert_eq!(Field::Any.as_raw(), 0);
        assert_eq!(Field::Alternate.as_raw(), 7);
        assert_eq!(Field::from_raw(5), Field::SeqTb);
        assert_eq!(Field::from_raw(42), Field::Any);
        assert_eq!(Field::from(FieldParity::Bottom), Field::Bottom);
    }
}
