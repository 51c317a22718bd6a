//! Background worker threads.
//!
//! Every background process (RAW flush, dealer, optimizer discovery and
//! worker, cleaner) is one long-lived named thread running a cycle closure
//! on its own cadence. A failed cycle is logged and retried after a fixed
//! back-off; it never ends the thread. Workers stop on shutdown and can be
//! woken early, e.g. when new work was queued for them.

use doclog_core::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Outcome of one worker cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing left to do; sleep for the interval
    Idle,
    /// More work may be pending; run again right away
    Busy,
}

/// Cadence of a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name
    pub name: String,
    /// Sleep between idle cycles
    pub interval: Duration,
    /// Sleep after a failed cycle
    pub backoff: Duration,
}

impl WorkerConfig {
    /// Worker `name` with cadences in milliseconds
    pub fn new(name: impl Into<String>, interval_ms: u64, backoff_ms: u64) -> Self {
        WorkerConfig {
            name: name.into(),
            interval: Duration::from_millis(interval_ms),
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

struct Signal {
    shutdown: AtomicBool,
    woken: Mutex<bool>,
    cond: Condvar,
    cycles: AtomicU64,
    failures: AtomicU64,
}

impl Signal {
    /// Sleep up to `timeout`, returning early on wake or shutdown.
    fn sleep(&self, timeout: Duration) {
        let mut woken = self.woken.lock();
        if !*woken && !self.shutdown.load(Ordering::Acquire) {
            self.cond.wait_for(&mut woken, timeout);
        }
        *woken = false;
    }

    fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cond.notify_all();
    }
}

/// Handle to a running worker. Stops and joins the thread on drop.
pub struct WorkerHandle {
    name: String,
    signal: Arc<Signal>,
    thread: Option<JoinHandle<()>>,
}

/// Cheap clonable handle that can only wake a worker.
#[derive(Clone)]
pub struct Waker {
    signal: Arc<Signal>,
}

impl Waker {
    /// Wake the worker if it is sleeping
    pub fn wake(&self) {
        self.signal.wake();
    }
}

impl WorkerHandle {
    /// Spawn a worker running `cycle` until shutdown.
    pub fn spawn<F>(config: WorkerConfig, mut cycle: F) -> Result<Self>
    where
        F: FnMut() -> Result<Cycle> + Send + 'static,
    {
        let signal = Arc::new(Signal {
            shutdown: AtomicBool::new(false),
            woken: Mutex::new(false),
            cond: Condvar::new(),
            cycles: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });

        let thread_signal = Arc::clone(&signal);
        let name = config.name.clone();
        let thread = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                info!(target: "doclog::worker", worker = %name, "Worker started");
                while !thread_signal.shutdown.load(Ordering::Acquire) {
                    thread_signal.cycles.fetch_add(1, Ordering::Relaxed);
                    match cycle() {
                        Ok(Cycle::Busy) => continue,
                        Ok(Cycle::Idle) => thread_signal.sleep(config.interval),
                        Err(e) => {
                            thread_signal.failures.fetch_add(1, Ordering::Relaxed);
                            error!(target: "doclog::worker", worker = %name, error = %e, "Worker cycle failed");
                            thread_signal.sleep(config.backoff);
                        }
                    }
                }
                info!(target: "doclog::worker", worker = %name, "Worker stopped");
            })?;

        Ok(WorkerHandle {
            name: config.name,
            signal,
            thread: Some(thread),
        })
    }

    /// Worker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wake the worker if it is sleeping
    pub fn wake(&self) {
        self.signal.wake();
    }

    /// Handle that can wake this worker from elsewhere
    pub fn waker(&self) -> Waker {
        Waker {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Cycles started so far
    pub fn cycles(&self) -> u64 {
        self.signal.cycles.load(Ordering::Relaxed)
    }

    /// Cycles that returned an error so far
    pub fn failures(&self) -> u64 {
        self.signal.failures.load(Ordering::Relaxed)
    }

    /// Signal shutdown and join the thread. The current cycle finishes first.
    pub fn stop(&mut self) {
        self.signal.shutdown.store(true, Ordering::Release);
        self.signal.wake();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(target: "doclog::worker", worker = %self.name, "Worker thread panicked");
            } else {
                debug!(target: "doclog::worker", worker = %self.name, "Worker joined");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
