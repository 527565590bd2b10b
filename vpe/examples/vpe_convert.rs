// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! Pushes synthetic NV12 frames through the VPE and reports what comes out.
//!
//! ```text
//! cargo run --example vpe_convert -- --emulate --interlaced --frames 10
//! cargo run --example vpe_convert -- --device /dev/video0 --width 1920 --height 1080
//! ```

mod common;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use tracing::{error, info};
use vpe::{
    FlowResult, FrameFlags, MediaElement, Processor, VideoInfo, VpeBuffer, VpeConfig,
    device::{EmulatedDevice, V4l2Device, VideoDevice},
    processor::StateChange,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration file; command line options override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// V4L2 device node.
    #[arg(long, env = "VPE_DEVICE")]
    device: Option<PathBuf>,

    /// Run against the in-process emulated device.
    #[arg(long)]
    emulate: bool,

    #[arg(long, default_value_t = 720)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Mark the input as interlaced, top field first.
    #[arg(long)]
    interlaced: bool,

    /// Frames to push.
    #[arg(long, default_value_t = 30)]
    frames: u32,

    #[arg(long)]
    input_buffers: Option<u32>,

    #[arg(long)]
    output_buffers: Option<u32>,
}

fn build_config(args: &Args) -> vpe::Result<VpeConfig> {
    let mut config = match &args.config {
        Some(path) => VpeConfig::from_file(path)?,
        None => VpeConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(count) = args.input_buffers {
        config.num_input_buffers = count;
    }
    if let Some(count) = args.output_buffers {
        config.num_output_buffers = count;
    }
    if args.emulate {
        config.allocator = vpe::config::AllocatorConfig::Memfd;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> vpe::Result<()> {
    let config = build_config(&args)?;
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let downstream = Arc::new(move |buffer: VpeBuffer| -> FlowResult {
        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            count,
            index = buffer.index(),
            timestamp = ?buffer.timestamp(),
            sequence = buffer.sequence(),
            "Processed frame"
        );
        Ok(())
    });

    let device: Arc<dyn VideoDevice> = if args.emulate {
        Arc::new(EmulatedDevice::new().with_auto_process(true))
    } else {
        Arc::new(V4l2Device::open(&config.device)?)
    };
    let allocator = config.allocator.build()?;
    let processor = Processor::new(config, device, allocator, downstream)?;

    let info = VideoInfo::new(args.width, args.height)
        .with_interlaced(args.interlaced)
        .with_framerate(30, 1);
    processor.negotiate(&info)?;

    let frame_duration = Duration::from_nanos(1_000_000_000 / 30);
    for frame_number in 0..args.frames {
        let buffer = processor
            .acquire_input()
            .map_err(|flow| vpe::Error::Other(format!("No input buffer: {flow}")))?;
        buffer.set_timestamp(Some(frame_duration * frame_number));
        buffer.set_flags(FrameFlags {
            top_field_first: true,
            repeat_first_field: false,
        });
        processor
            .push(buffer)
            .map_err(|flow| vpe::Error::Other(format!("Push failed: {flow}")))?;
    }

    let expected = if processor.is_passthrough() || !args.interlaced {
        args.frames as usize
    } else {
        args.frames as usize * 2
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while delivered.load(Ordering::Relaxed) < expected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    processor.change_state(StateChange::PausedToReady);
    processor.change_state(StateChange::ReadyToNull);

    info!(
        pushed = args.frames,
        delivered = delivered.load(Ordering::Relaxed),
        output = ?processor.output_info(),
        "Done"
    );
    Ok(())
}

fn main() {
    common::setup_logging();
    let args = Args::parse();
    if let Err(err) = run(args) {
        error!("{err}");
        std::process::exit(1);
    }
}
