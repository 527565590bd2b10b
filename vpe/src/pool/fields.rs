// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Field splitting for field-alternate submission.
//!
//! With [`crate::InterlacePolicy::FieldAlternate`] each logical frame owns four
//! consecutive physical slots starting at `index * 4`:
//!
//! | offset | field                 |
//! |--------|-----------------------|
//! | 0      | top                   |
//! | 1      | bottom                |
//! | 2      | top, pulldown repeat  |
//! | 3      | bottom, pulldown repeat |
//!
//! Odd slots point at the bottom field of the sequential frame.

use crate::{FieldParity, buffer::PlaneLayout};

/// Physical slots per logical frame.
pub(crate) const FIELD_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldStep {
    /// Offset from the frame's base slot.
    pub(crate) slot: usize,
    pub(crate) parity: FieldParity,
    /// Only the leading field carries the frame timestamp.
    pub(crate) carries_timestamp: bool,
}

fn slot_for(parity: FieldParity, repeat: bool) -> usize {
    match (parity, repeat) {
        (FieldParity::Top, false) => 0,
        (FieldParity::Bottom, false) => 1,
        (FieldParity::Top, true) => 2,
        (FieldParity::Bottom, true) => 3,
    }
}

/// Plans the submissions for one frame.
///
/// `last_pushed` is the parity of the field most recently handed to the
/// driver; `None` accepts either leading field. A frame whose leading field
/// repeats `last_pushed` is rejected with that parity.
pub(crate) fn plan(
    top_field_first: bool,
    repeat_first_field: bool,
    last_pushed: Option<FieldParity>,
) -> Result<Vec<FieldStep>, FieldParity> {
    let first = if top_field_first {
        FieldParity::Top
    } else {
        FieldParity::Bottom
    };
    if last_pushed.unwrap_or(first.opposite()) == first {
        return Err(first);
    }
    let second = first.opposite();
    let mut steps = vec![
        FieldStep {
            slot: slot_for(first, false),
            parity: first,
            carries_timestamp: true,
        },
        FieldStep {
            slot: slot_for(second, false),
            parity: second,
            carries_timestamp: false,
        },
    ];
    if repeat_first_field {
        steps.push(FieldStep {
            slot: slot_for(first, true),
            parity: first,
            carries_timestamp: false,
        });
    }
    Ok(steps)
}

/// Moves a plane layout from the top field to the bottom field.
pub(crate) fn shift_to_bottom_field(planes: &mut [PlaneLayout], field_offset: u32) {
    if let Some(luma) = planes.get_mut(0) {
        luma.data_offset += field_offset;
    }
    if let Some(chroma) = planes.get_mut(1) {
        chroma.data_offset += field_offset >> 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;

    fn order(steps: &[FieldStep]) -> Vec<(usize, FieldParity)> {
        steps.iter().map(|s| (s.slot, s.parity)).collect()
    }

    #[test]
    fn top_field_first() {
        let steps = plan(true, false, None).unwrap();
        assert_eq!(
            order(&steps),
            vec![(0, FieldParity::Top), (1, FieldParity::Bottom)]
        );
        assert!(steps[0].carries_timestamp);
        assert!(!steps[1].carries_timestamp);
    }

    #[test]
    fn bottom_field_first_swaps_order() {
        let steps = plan(false, false, None).unwrap();
        assert_eq!(
            order(&steps),
            vec![(1, FieldParity::Bottom), (0, FieldParity::Top)]
        );
        assert!(steps[0].carries_timestamp);
    }

    #[test]
    fn pulldown_repeats_leading_field() {
        let tff = plan(true, true, Some(FieldParity::Bottom)).unwrap();
        assert_eq!(tff[2].slot, 2);
        assert_eq!(tff[2].parity, FieldParity::Top);
        let bff = plan(false, true, Some(FieldParity::Top)).unwrap();
        assert_eq!(bff[2].slot, 3);
        assert_eq!(bff[2].parity, FieldParity::Bottom);
        assert!(tff.iter().chain(&bff).filter(|s| s.carries_timestamp).count() == 2);
    }

    #[test]
    fn repeated_leading_parity_is_rejected() {
        assert_eq!(
            plan(true, false, Some(FieldParity::Top)),
            Err(FieldParity::Top)
        );
        assert_eq!(
            plan(false, false, Some(FieldParity::Bottom)),
            Err(FieldParity::Bottom)
        );
        assert!(plan(true, false, Some(FieldParity::Bottom)).is_ok());
    }

    #[test]
    fn bottom_field_offsets() {
        let (w, h) = (720, 480);
        let mut planes = PixelFormat::Nv12.plane_layouts(w, h);
        let field_offset = planes[1].data_offset >> 1;
        shift_to_bottom_field(&mut planes, field_offset);
        assert_eq!(planes[0].data_offset, w * h / 2);
        assert_eq!(planes[1].data_offset, w * h + w * h / 4);
    }
}
