// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the buffer pools against the emulated device.
//!
//! Every test drives a [`BufferPool`] through a private [`EmulatedDevice`]
//! and checks both the pool's bookkeeping and the driver calls it caused.
//!
//! # Test Coverage
//!
//! - Capture pre-submission, completion and automatic requeue
//! - Progressive and per-field submission, slot layout and timestamps
//! - Field parity enforcement and partial submission
//! - Stream-off reclaim, flushing and destroy
//! - Destroy while streaming and a failed capture requeue

use std::{sync::mpsc, thread, time::Duration};

use vpe::{
    AcquireMode, BufferPool, Error, Field, FrameFlags, InterlacePolicy, PixelFormat, PoolSettings, SlotState,
    device::{BufferType, EmulatedDevice, IoctlCall},
    memory::MemfdAllocator,
};

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

const OUTPUT: BufferType = BufferType::VideoOutputMplane;
const CAPTURE: BufferType = BufferType::VideoCaptureMplane;

fn setup_pool(settings: PoolSettings) -> BufferPool {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();
    });
    BufferPool::new(settings, &MemfdAllocator).unwrap()
}

fn flags(top_field_first: bool, repeat_first_field: bool) -> FrameFlags {
    FrameFlags {
        top_field_first,
        repeat_first_field,
    }
}

/// `(index, field, timestamp, data_offsets)` of every submission `QBUF`.
fn submitted(device: &EmulatedDevice) -> Vec<(u32, Field, Option<Duration>, Vec<u32>)> {
    device
        .queue_calls(OUTPUT)
        .into_iter()
        .filter_map(|call| match call {
            IoctlCall::Queue {
                index,
                field,
                timestamp,
                data_offsets,
                ..
            } => Some((index, field, timestamp, data_offsets)),
            _ => None,
        })
        .collect()
}

fn assert_tracking_consistent(pool: &BufferPool) {
    for slot in pool.tracking_snapshot() {
        assert_eq!(
            slot.state == SlotState::WithDriver,
            slot.q_cnt > 0,
            "slot {} is {:?} with q_cnt {}",
            slot.index,
            slot.state,
            slot.q_cnt
        );
        assert!(slot.ref_count >= slot.q_cnt);
    }
}

#[test]
fn capture_pool_presubmits_and_requeues() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::capture(8, PixelFormat::Nv12, 800, 600));
    pool.set_streaming(&device, true, false).unwrap();

    let calls = device.calls();
    assert_eq!(
        calls[0],
        IoctlCall::RequestBuffers {
            buf_type: CAPTURE,
            count: 8
        }
    );
    let queried = calls
        .iter()
        .filter(|c| matches!(c, IoctlCall::QueryBuffer { .. }))
        .count();
    assert_eq!(queried, 8);
    assert_eq!(calls.last(), Some(&IoctlCall::StreamOn(CAPTURE)));
    assert_eq!(device.pending(CAPTURE), (0..8).collect::<Vec<_>>());
    assert!(device.queue_calls(CAPTURE).iter().all(|call| matches!(
        call,
        IoctlCall::Queue { field: Field::Any, timestamp: None, data_offsets, .. }
            if data_offsets == &vec![0, 800 * 600]
    )));
    assert!(pool.tracking_snapshot().iter().all(|s| s.state == SlotState::WithDriver
        && s.q_cnt == 1
        && s.ref_count == 1));

    assert!(device.complete(CAPTURE, 3));
    let frame = pool.dequeue().unwrap();
    assert_eq!(frame.index(), 3);
    assert_eq!(pool.tracking_snapshot()[3].state, SlotState::Allocated);
    assert!(pool.dequeue().is_none());

    drop(frame);
    let snapshot = pool.tracking_snapshot();
    assert_eq!(snapshot[3].state, SlotState::WithDriver);
    assert_eq!(snapshot[3].ref_count, 1);
    assert_eq!(device.pending(CAPTURE).last(), Some(&3));
}

#[test]
fn capture_buffer_released_after_stream_off_becomes_free() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::capture(3, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, false).unwrap();
    assert!(device.complete(CAPTURE, 0));
    let frame = pool.dequeue().unwrap();

    pool.set_streaming(&device, false, false).unwrap();
    assert!(!device.is_streaming(CAPTURE));
    assert_eq!(pool.free_count(), 2);
    drop(frame);
    assert_eq!(pool.free_count(), 3);
}

#[test]
fn progressive_frame_takes_one_slot() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, false).unwrap();
    assert_eq!(pool.physical_count(), 2);

    let frame = pool.get().unwrap();
    frame.set_timestamp(Some(Duration::from_millis(40)));
    assert_eq!(pool.queue(frame).unwrap(), 1);

    assert_eq!(
        submitted(&device),
        vec![(0, Field::Any, Some(Duration::from_millis(40)), vec![0, 64 * 32])]
    );
    let slot = &pool.tracking_snapshot()[0];
    assert_eq!((slot.state, slot.q_cnt, slot.ref_count), (SlotState::WithDriver, 1, 1));
}

#[test]
fn top_field_first_with_repeat_fills_three_field_slots() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(3, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();
    assert_eq!(pool.physical_count(), 12);

    let _held = pool.get().unwrap();
    let frame = pool.get().unwrap();
    assert_eq!(frame.index(), 1);
    let ts = Some(Duration::from_millis(33));
    frame.set_timestamp(ts);
    frame.set_flags(flags(true, true));
    assert_eq!(pool.queue(frame).unwrap(), 3);

    let luma = 64 * 32;
    assert_eq!(
        submitted(&device),
        vec![
            (4, Field::Top, ts, vec![0, luma]),
            (5, Field::Bottom, None, vec![luma / 2, luma + luma / 4]),
            (6, Field::Top, None, vec![0, luma]),
        ]
    );
    let slot = &pool.tracking_snapshot()[1];
    assert_eq!((slot.state, slot.q_cnt, slot.ref_count), (SlotState::WithDriver, 3, 3));
}

#[test]
fn bottom_field_first_queues_bottom_then_top() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();

    let frame = pool.get().unwrap();
    frame.set_flags(flags(false, false));
    assert_eq!(pool.queue(frame).unwrap(), 2);

    let fields: Vec<_> = submitted(&device)
        .into_iter()
        .map(|(index, field, ..)| (index, field))
        .collect();
    assert_eq!(fields, vec![(1, Field::Bottom), (0, Field::Top)]);
}

#[test]
fn frame_repeating_the_last_field_is_dropped() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();

    let first = pool.get().unwrap();
    first.set_flags(flags(false, false));
    assert_eq!(pool.queue(first).unwrap(), 2);

    // Ended on a top field, so the next frame must not start with one.
    let second = pool.get().unwrap();
    second.set_flags(flags(true, false));
    assert_eq!(pool.queue(second).unwrap(), 0);
    assert_eq!(submitted(&device).len(), 2);
    assert_eq!(pool.tracking_snapshot()[1].state, SlotState::Free);

    let third = pool.get().unwrap();
    third.set_flags(flags(false, true));
    assert_eq!(pool.queue(third).unwrap(), 3);
}

#[test]
fn field_slots_map_back_to_their_frame() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();

    let held = pool.get().unwrap();
    let frame = pool.get().unwrap();
    frame.set_flags(flags(true, false));
    pool.queue(frame).unwrap();

    assert!(device.complete(OUTPUT, 5));
    let bottom = pool.dequeue().unwrap();
    assert_eq!(bottom.index(), 1);
    assert_eq!(bottom.field(), Field::Bottom);
    let slot = &pool.tracking_snapshot()[1];
    assert_eq!((slot.state, slot.q_cnt), (SlotState::WithDriver, 1));
    drop(bottom);

    assert!(device.complete(OUTPUT, 4));
    let top = pool.dequeue().unwrap();
    assert_eq!(top.index(), 1);
    assert_eq!(pool.tracking_snapshot()[1].state, SlotState::Allocated);
    drop(top);
    assert_eq!(pool.tracking_snapshot()[1].state, SlotState::Free);

    assert_eq!(pool.get().unwrap().index(), 1);
    drop(held);
}

#[test]
fn sequential_policy_keeps_one_slot_per_frame() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(
        PoolSettings::submission(2, PixelFormat::Nv12, 64, 32)
            .with_interlace_policy(InterlacePolicy::SequentialTopBottom),
    );
    pool.set_streaming(&device, true, true).unwrap();
    assert_eq!(pool.physical_count(), 2);

    let frame = pool.get().unwrap();
    frame.set_flags(flags(false, true));
    assert_eq!(pool.queue(frame).unwrap(), 1);
    assert_eq!(submitted(&device)[0].1, Field::SeqTb);
}

#[test]
fn stream_off_reclaims_and_wakes_waiters() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(1, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, false).unwrap();
    pool.queue(pool.get().unwrap()).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || tx.send(pool.get().map(|b| b.index())).unwrap())
    };
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    pool.set_streaming(&device, false, false).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Some(0));
    waiter.join().unwrap();
    assert!(device.calls().contains(&IoctlCall::StreamOff(OUTPUT)));
    assert_tracking_consistent(&pool);
}

#[test]
fn flushing_releases_blocked_get() {
    let pool = setup_pool(PoolSettings::submission(1, PixelFormat::Nv12, 64, 32));
    let held = pool.get().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || tx.send(pool.get().is_none()).unwrap())
    };
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    pool.set_flushing(true);
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    waiter.join().unwrap();

    pool.set_flushing(false);
    drop(held);
    assert!(pool.try_get().is_some());
}

#[test]
fn queue_before_streaming_is_rejected() {
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    let frame = pool.get().unwrap();
    assert!(matches!(pool.queue(frame), Err(Error::NotStreaming)));
    assert_eq!(pool.free_count(), 2);
    assert!(pool.dequeue().is_none());
}

#[test]
fn short_buffer_grant_fails_stream_on() {
    let device = EmulatedDevice::new().with_max_buffers(4);
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    let err = pool.set_streaming(&device, true, true).unwrap_err();
    assert!(matches!(
        err,
        Error::BufferCountMismatch {
            requested: 8,
            granted: 4
        }
    ));
    assert!(!pool.is_streaming());
}

#[test]
fn driver_error_keeps_fields_already_queued() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();
    device.fail_queue_after(1);

    let frame = pool.get().unwrap();
    frame.set_flags(flags(true, true));
    assert_eq!(pool.queue(frame).unwrap(), 1);
    let slot = &pool.tracking_snapshot()[0];
    assert_eq!((slot.state, slot.q_cnt, slot.ref_count), (SlotState::WithDriver, 1, 1));
    assert_eq!(device.pending(OUTPUT), vec![0]);
}

#[test]
fn destroyed_pool_refuses_buffers() {
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    let held = pool.get().unwrap();
    pool.destroy();

    assert!(pool.get().is_none());
    assert!(matches!(pool.put(held), Err(Error::ShuttingDown)));
    assert!(pool.tracking_snapshot().iter().all(|s| s.detached));
}

#[test]
fn foreign_buffers_are_refused() {
    let pool = setup_pool(PoolSettings::submission(1, PixelFormat::Nv12, 64, 32));
    let other = setup_pool(PoolSettings::submission(1, PixelFormat::Nv12, 64, 32));
    let stranger = other.get().unwrap();
    assert!(!pool.owns(&stranger));
    assert!(matches!(pool.queue(stranger), Err(Error::ForeignBuffer)));
    assert_eq!(other.free_count(), 1);
}

#[test]
fn tracking_stays_consistent_over_many_frames() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(3, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();

    let mut top_field_first = true;
    for frame_number in 0..12u64 {
        let frame = pool.try_get().unwrap();
        let repeat = frame_number % 3 == 1;
        frame.set_timestamp(Some(Duration::from_millis(frame_number * 40)));
        frame.set_flags(flags(top_field_first, repeat));
        assert_eq!(pool.queue(frame).unwrap(), if repeat { 3 } else { 2 });
        if repeat {
            top_field_first = !top_field_first;
        }
        assert_tracking_consistent(&pool);

        for index in device.pending(OUTPUT) {
            assert!(device.complete(OUTPUT, index));
        }
        while let Some(done) = pool.dequeue() {
            assert_tracking_consistent(&pool);
            drop(done);
        }
        assert_eq!(pool.free_count(), 3);
    }
}

#[test]
fn stream_off_reclaims_every_driver_held_field() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(3, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();

    let first = pool.get().unwrap();
    first.set_flags(flags(true, true));
    assert_eq!(pool.queue(first).unwrap(), 3);
    let second = pool.get().unwrap();
    second.set_flags(flags(false, false));
    assert_eq!(pool.queue(second).unwrap(), 2);

    assert!(device.complete(OUTPUT, 0));
    let held = pool.dequeue().unwrap();
    let snapshot = pool.tracking_snapshot();
    assert_eq!((snapshot[0].q_cnt, snapshot[0].ref_count), (2, 3));
    assert_eq!((snapshot[1].q_cnt, snapshot[1].ref_count), (2, 2));

    pool.set_streaming(&device, false, true).unwrap();
    assert!(device.pending(OUTPUT).is_empty());
    let snapshot = pool.tracking_snapshot();
    assert_eq!(
        (snapshot[0].state, snapshot[0].q_cnt, snapshot[0].ref_count),
        (SlotState::Allocated, 0, 1)
    );
    assert_eq!((snapshot[1].state, snapshot[1].ref_count), (SlotState::Free, 0));
    assert_eq!(pool.free_count(), 2);
    assert_tracking_consistent(&pool);

    drop(held);
    assert_eq!(pool.free_count(), 3);

    // Parity tracking starts over on the next stream-on.
    pool.set_streaming(&device, true, true).unwrap();
    let next = pool.get().unwrap();
    next.set_flags(flags(true, false));
    assert_eq!(pool.queue(next).unwrap(), 2);
}

#[test]
fn destroy_while_streaming_detaches_everything() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(PoolSettings::submission(2, PixelFormat::Nv12, 64, 32));
    pool.set_streaming(&device, true, true).unwrap();

    let frame = pool.get().unwrap();
    frame.set_flags(flags(true, true));
    assert_eq!(pool.queue(frame).unwrap(), 3);
    assert!(device.complete(OUTPUT, 0));
    let held = pool.dequeue().unwrap();

    pool.destroy();
    assert!(!pool.is_streaming());
    assert!(!device.is_streaming(OUTPUT));
    assert!(device.calls().contains(&IoctlCall::StreamOff(OUTPUT)));
    let snapshot = pool.tracking_snapshot();
    assert_eq!(
        (snapshot[0].state, snapshot[0].q_cnt, snapshot[0].ref_count),
        (SlotState::Allocated, 0, 1)
    );
    assert!(!snapshot[0].detached);
    assert!(snapshot[1].detached);
    assert_eq!(held.ref_count(), 1);
    assert!(held.export_fd().is_ok());
    assert!(pool.get().is_none());

    drop(held);
    assert!(pool.tracking_snapshot().iter().all(|s| s.detached));
    assert!(pool.try_get().is_none());
}

#[test]
fn failed_capture_requeue_frees_the_slot_and_wakes_a_waiter() {
    let device = EmulatedDevice::new();
    let pool = setup_pool(
        PoolSettings::capture(3, PixelFormat::Nv12, 64, 32).with_acquire_mode(AcquireMode::Block),
    );
    pool.set_streaming(&device, true, false).unwrap();
    assert!(device.complete(CAPTURE, 1));
    let frame = pool.dequeue().unwrap();
    assert_eq!(frame.index(), 1);

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || tx.send(pool.get().map(|b| b.index())).unwrap())
    };
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    device.fail_queue_after(0);
    drop(frame);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Some(1));
    waiter.join().unwrap();

    assert_eq!(device.pending(CAPTURE), vec![0, 2]);
    let slot = &pool.tracking_snapshot()[1];
    assert_eq!((slot.state, slot.q_cnt, slot.ref_count), (SlotState::Free, 0, 0));
    assert_tracking_consistent(&pool);
}
