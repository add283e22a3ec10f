// SPDX-License-Identifier: AGPL-3.0-only

//! Background sweep execution
//!
//! A sweep runs on one worker thread, strictly sequentially, so the backend
//! being measured is never contended. The caller keeps a [`SweepHandle`]
//! to cancel, poll or wait; [`SweepRunner`] makes sure only one sweep runs
//! at a time.

use crate::controller::{SweepController, SweepSummary};
use crate::error::{Result, SweepError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Cooperative cancellation flag, checked at model and batch boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running sweep
#[derive(Debug)]
pub struct SweepHandle {
    cancel: CancelToken,
    worker: JoinHandle<SweepSummary>,
}

impl SweepHandle {
    /// Ask the sweep to stop at the next model or batch boundary
    pub fn cancel(&self) {
        tracing::info!("Sweep cancellation requested");
        self.cancel.cancel();
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the sweep ends
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::WorkerPanicked`] if the worker panicked.
    pub fn wait(self) -> Result<SweepSummary> {
        self.worker.join().map_err(|_| SweepError::WorkerPanicked)
    }
}

/// Start `controller` on a new worker thread
///
/// # Errors
///
/// Returns error if the configuration is invalid or the thread cannot be
/// spawned.
pub fn start(controller: SweepController) -> Result<SweepHandle> {
    spawn(controller, None)
}

fn spawn(controller: SweepController, running: Option<RunningGuard>) -> Result<SweepHandle> {
    controller.config().validate()?;
    let cancel = controller.cancel_token();

    let worker = thread::Builder::new()
        .name("edgebench-sweep".into())
        .spawn(move || {
            let _running = running;
            controller.run()
        })
        .map_err(SweepError::Spawn)?;

    Ok(SweepHandle { cancel, worker })
}

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No sweep running; a new one may start
    Idle,
    /// A sweep is in progress
    Running,
}

/// Starts sweeps one at a time
///
/// `Idle → Running → Idle`: a second start while running is rejected, and
/// the runner returns to idle when the worker exits, panics included.
#[derive(Debug, Clone, Default)]
pub struct SweepRunner {
    running: Arc<AtomicBool>,
}

impl SweepRunner {
    /// Idle runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> RunnerState {
        if self.running.load(Ordering::SeqCst) {
            RunnerState::Running
        } else {
            RunnerState::Idle
        }
    }

    /// Start a sweep if none is running
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::AlreadyRunning`] while a sweep is in progress,
    /// or the error of [`start`].
    pub fn start(&self, controller: SweepController) -> Result<SweepHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SweepError::AlreadyRunning);
        }
        let guard = RunningGuard(Arc::clone(&self.running));
        spawn(controller, Some(guard))
    }
}

/// Clears the running flag when dropped
#[derive(Debug)]
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
