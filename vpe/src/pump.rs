// SPDX-FileCopyrightText: 2026 Contributors to the VPE buffer manager project.
// SPDX-License-Identifier: Apache-2.0

//! The output pump: moves processed frames from the capture pool downstream.
//!
//! Each iteration takes one completed capture buffer and pushes it to the
//! [`Downstream`]. When none is ready, completed submission buffers are
//! drained so they return to the submission pool, and the pump sleeps for the
//! configured interval before polling again.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, trace, warn};

use crate::{BufferPool, FlowError, FlowResult, Result, processor::Event};

/// Consumer of processed frames.
pub trait Downstream: Send + Sync {
    /// Delivers one buffer. Dropping it returns it to its pool.
    fn push(&self, buffer: crate::VpeBuffer) -> FlowResult;

    /// Forwards a pipeline event. Returns whether it was handled.
    fn event(&self, _event: &Event) -> bool {
        true
    }

    /// Fixed output size the consumer requires, if any.
    fn allowed_size(&self) -> Option<(u32, u32)> {
        None
    }
}

impl<F> Downstream for F
where
    F: Fn(crate::VpeBuffer) -> FlowResult + Send + Sync,
{
    fn push(&self, buffer: crate::VpeBuffer) -> FlowResult {
        self(buffer)
    }
}

/// What one pump iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStep {
    /// A capture buffer was delivered downstream.
    Delivered,
    /// Nothing was ready; this many submission buffers were recycled.
    Idle { drained: usize },
}

/// Runs a single iteration without sleeping.
pub fn pump_once(
    capture: &BufferPool,
    submission: Option<&BufferPool>,
    downstream: &dyn Downstream,
) -> PumpStep {
    if let Some(buffer) = capture.dequeue() {
        trace!(index = buffer.index(), "Pushing buffer downstream");
        match downstream.push(buffer) {
            Ok(()) => {}
            Err(FlowError::Flushing) | Err(FlowError::Eos) => {
                debug!("Downstream is not accepting buffers")
            }
            Err(err) => warn!("Downstream push failed: {err}"),
        }
        return PumpStep::Delivered;
    }
    let mut drained = 0;
    if let Some(submission) = submission {
        while let Some(buffer) = submission.dequeue() {
            drop(buffer);
            drained += 1;
        }
    }
    PumpStep::Idle { drained }
}

/// A running output pump thread.
#[derive(Debug)]
pub struct OutputPump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputPump {
    /// Spawns the pump thread.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the thread cannot be spawned.
    pub fn start(
        capture: BufferPool,
        submission: Option<BufferPool>,
        downstream: Arc<dyn Downstream>,
        idle_interval: Duration,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("vpe-output".to_string())
            .spawn(move || {
                debug!("Output pump started");
                while flag.load(Ordering::Acquire) {
                    if let PumpStep::Idle { .. } =
                        pump_once(&capture, submission.as_ref(), downstream.as_ref())
                    {
                        thread::sleep(idle_interval);
                    }
                }
                debug!("Output pump stopped");
            })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopped from a downstream callback; the loop exits on its own.
            return;
        }
        if handle.join().is_err() {
            error!("Output pump thread panicked");
        }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        self.stop();
    }
}
