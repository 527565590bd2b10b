// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Per-buffer lifecycle bookkeeping.

use std::sync::Arc;

use crate::buffer::{BufferDescriptor, PlaneLayout};

/// Lifecycle state of a pool slot.
///
/// Slots move `Free → Allocated → WithDriver → Allocated → Free`; a capture
/// pool also moves `Free → WithDriver` when it pre-submits at stream-on and
/// `Allocated → WithDriver` when a released buffer is requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Allocated,
    WithDriver,
}

/// Diagnostic view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub index: usize,
    pub state: SlotState,
    /// Physical driver slots holding this buffer.
    pub q_cnt: usize,
    /// References held by handles and driver slots together.
    pub ref_count: usize,
    /// Set once the buffer left the arena during shutdown.
    pub detached: bool,
}

#[derive(Debug)]
struct TrackingSlot {
    state: SlotState,
    q_cnt: usize,
    descriptor: Option<Arc<BufferDescriptor>>,
}

/// One slot per logical buffer, in index order.
#[derive(Debug)]
pub(crate) struct TrackingTable {
    slots: Vec<TrackingSlot>,
}

impl TrackingTable {
    pub(crate) fn new(descriptors: Vec<Arc<BufferDescriptor>>) -> Self {
        let slots = descriptors
            .into_iter()
            .map(|descriptor| TrackingSlot {
                state: SlotState::Free,
                q_cnt: 0,
                descriptor: Some(descriptor),
            })
            .collect();
        Self { slots }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    pub(crate) fn descriptor(&self, index: usize) -> Option<&Arc<BufferDescriptor>> {
        self.slots.get(index).and_then(|slot| slot.descriptor.as_ref())
    }

    /// First free slot holding a buffer, lowest index first.
    pub(crate) fn first_free(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == SlotState::Free && slot.descriptor.is_some())
    }

    pub(crate) fn free_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::Free && slot.descriptor.is_some())
            .count()
    }

    /// `Free → Allocated`.
    pub(crate) fn acquire(&mut self, index: usize) -> Option<Arc<BufferDescriptor>> {
        let slot = self.slots.get_mut(index)?;
        if slot.state != SlotState::Free || slot.descriptor.is_none() {
            return None;
        }
        slot.state = SlotState::Allocated;
        slot.q_cnt = 0;
        slot.descriptor.clone()
    }

    /// Records `q_cnt` physical slots handed to the driver.
    pub(crate) fn mark_with_driver(&mut self, index: usize, q_cnt: usize) {
        debug_assert!(q_cnt > 0);
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::WithDriver;
            slot.q_cnt = q_cnt;
        }
    }

    /// One physical slot came back from the driver.
    ///
    /// Returns `None` if the table did not consider the buffer driver-owned.
    pub(crate) fn complete_one(&mut self, index: usize) -> Option<Arc<BufferDescriptor>> {
        let slot = self.slots.get_mut(index)?;
        if slot.state != SlotState::WithDriver || slot.q_cnt == 0 {
            return None;
        }
        slot.q_cnt -= 1;
        if slot.q_cnt == 0 {
            slot.state = SlotState::Allocated;
        }
        slot.descriptor.clone()
    }

    /// `WithDriver → Allocated` for every slot, returning the driver references to drop.
    pub(crate) fn reclaim_all(&mut self) -> Vec<(Arc<BufferDescriptor>, usize)> {
        let mut reclaimed = Vec::new();
        for slot in &mut self.slots {
            if slot.state != SlotState::WithDriver {
                continue;
            }
            let q_cnt = std::mem::take(&mut slot.q_cnt);
            slot.state = SlotState::Allocated;
            if let Some(descriptor) = &slot.descriptor {
                reclaimed.push((descriptor.clone(), q_cnt));
            }
        }
        reclaimed
    }

    /// Returns a slot to the free list.
    pub(crate) fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::Free;
            slot.q_cnt = 0;
        }
    }

    /// Removes a buffer from the arena.
    pub(crate) fn detach(&mut self, index: usize) -> Option<Arc<BufferDescriptor>> {
        let slot = self.slots.get_mut(index)?;
        slot.state = SlotState::Free;
        slot.q_cnt = 0;
        slot.descriptor.take()
    }

    /// Removes every free buffer from the arena.
    pub(crate) fn detach_free(&mut self) -> Vec<Arc<BufferDescriptor>> {
        self.slots
            .iter_mut()
            .filter(|slot| slot.state == SlotState::Free)
            .filter_map(|slot| slot.descriptor.take())
            .collect()
    }

    pub(crate) fn any_with_driver(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.state == SlotState::WithDriver)
    }

    pub(crate) fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| SlotSnapshot {
                index,
                state: slot.state,
                q_cnt: slot.q_cnt,
                ref_count: slot.descriptor.as_ref().map_or(0, |d| d.ref_count()),
                detached: slot.descriptor.is_none(),
            })
            .collect()
    }
}

/// Driver-side view of one physical slot.
#[derive(Debug, Clone)]
pub(crate) struct PhysicalSlot {
    /// Layout handed to `QBUF`, already shifted for bottom fields.
    pub(crate) planes: Vec<PlaneLayout>,
    pub(crate) queued: bool,
}
