//! Lifecycle coordination shared by the producer and consumer processes.
//!
//! Shutdown is two-phase:
//!
//! 1. A termination signal (or an explicit [`Lifecycle::shutdown`]) cancels
//!    the shared [`CancellationToken`]. Long-running tasks observe it and stop
//!    taking new work.
//! 2. The owner drives outstanding work through [`Lifecycle::drain`], which
//!    bounds it by the grace period. Running past the grace period is
//!    reported as [`ShutdownOutcome::TimedOut`] and the process moves on.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

pub use tokio_util::sync::CancellationToken;

/// Grace period used when none is configured.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Result of a bounded drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome<T> {
    /// The work finished inside the grace period.
    Clean(T),
    /// The grace period elapsed first; the work was abandoned.
    TimedOut(Duration),
}

/// Owns the process-wide cancellation token and the grace period.
///
/// Cheap to clone; all clones share the same token.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    token: CancellationToken,
    grace: Duration,
    triggered: Arc<AtomicBool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl Lifecycle {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Token observed by long-running tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Begin shutdown. Returns `true` only for the call that actually
    /// triggered it; repeated calls are no-ops.
    pub fn shutdown(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(reason, "shutdown started");
        self.token.cancel();
        true
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM.
    ///
    /// The task exits on its own once shutdown is triggered by any means.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    lifecycle.shutdown(signal);
                }
                _ = lifecycle.cancelled() => {}
            }
        })
    }

    /// Run `work` bounded by the grace period. Only a timeout is logged here;
    /// the caller reports what the work itself returned.
    pub async fn drain<F>(&self, what: &str, work: F) -> ShutdownOutcome<F::Output>
    where
        F: Future,
    {
        match tokio::time::timeout(self.grace, work).await {
            Ok(output) => ShutdownOutcome::Clean(output),
            Err(_) => {
                warn!(what, grace_ms = self.grace.as_millis() as u64, "drain timed out");
                ShutdownOutcome::TimedOut(self.grace)
            }
        }
    }

    /// Wait for every task within the grace period. Tasks still running when
    /// it elapses are aborted and awaited, so none outlive the call.
    pub async fn join_tasks<T>(&self, what: &str, handles: Vec<JoinHandle<T>>) -> JoinReport<T> {
        let deadline = tokio::time::Instant::now() + self.grace;
        let mut report = JoinReport {
            results: Vec::with_capacity(handles.len()),
            timed_out: false,
        };

        for mut handle in handles {
            if !report.timed_out {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(result) => {
                        report.results.push(result);
                        continue;
                    }
                    Err(_) => {
                        report.timed_out = true;
                        warn!(what, grace_ms = self.grace.as_millis() as u64, "drain timed out, aborting tasks");
                    }
                }
            }
            handle.abort();
            report.results.push(handle.await);
        }
        report
    }
}

/// Per-task results of [`Lifecycle::join_tasks`], in handle order.
#[derive(Debug)]
pub struct JoinReport<T> {
    pub results: Vec<Result<T, JoinError>>,
    /// Whether the grace period ran out and stragglers were aborted.
    pub timed_out: bool,
}

impl<T> JoinReport<T> {
    pub fn tally(&self) -> TaskTally {
        let mut tally = TaskTally::default();
        for result in &self.results {
            tally.record(result);
        }
        tally
    }
}

/// How a set of spawned tasks ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTally {
    pub spawned: usize,
    pub finished: usize,
    pub aborted: usize,
    pub panicked: usize,
}

impl TaskTally {
    /// Count one joined task.
    pub fn record<T>(&mut self, result: &Result<T, JoinError>) {
        self.spawned += 1;
        match result {
            Ok(_) => self.finished += 1,
            Err(e) if e.is_cancelled() => self.aborted += 1,
            Err(_) => self.panicked += 1,
        }
    }

    pub fn merge(&mut self, other: TaskTally) {
        self.spawned += other.spawned;
        self.finished += other.finished;
        self.aborted += other.aborted;
        self.panicked += other.panicked;
    }

    /// Every spawned task was joined one way or another.
    pub fn all_ended(&self) -> bool {
        self.finished + self.aborted + self.panicked == self.spawned
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        signal = ctrl_c() => signal,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            warn!("Failed to install CTRL+C handler: {e}");
            std::future::pending().await
        }
    }
}
