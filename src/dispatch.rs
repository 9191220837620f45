//! Fire-and-forget report delivery.
//!
//! `dispatch` only enqueues; a fixed pool of worker threads drains a bounded
//! queue into a [`ReportSink`]. Outcomes are logged and counted. Nothing is
//! retried or requeued, and nothing here touches throttle state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::transport::ReportSink;
use crate::IncidentReport;

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long `shutdown` waits for in-flight sends before detaching workers.
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 16,
            shutdown_grace: Duration::from_secs(6),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("dispatch workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("dispatch queue capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Snapshot of dispatch outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    /// Rejected at enqueue time (queue full or dispatcher closed).
    pub dropped: u64,
}

impl DispatchStats {
    pub fn in_flight(&self) -> u64 {
        self.queued.saturating_sub(self.sent + self.failed)
    }
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct ReportDispatcher {
    tx: Option<SyncSender<IncidentReport>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
    grace: Duration,
}

impl ReportDispatcher {
    pub fn start(config: DispatchConfig, sink: Arc<dyn ReportSink>) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::sync_channel::<IncidentReport>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            let rx = Arc::clone(&rx);
            let sink = Arc::clone(&sink);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("dispatch-{idx}"))
                .spawn(move || worker_loop(rx, sink, counters))
                .map_err(|e| anyhow!("failed to spawn dispatch worker: {}", e))?;
            workers.push(handle);
        }
        log::info!(
            "report dispatcher started ({} workers, queue {}, sink {})",
            config.workers,
            config.queue_capacity,
            sink.name()
        );

        Ok(Self {
            tx: Some(tx),
            workers,
            counters,
            grace: config.shutdown_grace,
        })
    }

    /// Enqueue without blocking. Returns false if the report was dropped.
    pub fn dispatch(&self, report: IncidentReport) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("dispatcher closed; dropping {} report", report.kind);
            return false;
        };
        match tx.try_send(report) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(report)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "dispatch queue full; dropping {} report for subject {}",
                    report.kind,
                    report.subject_id
                );
                false
            }
            Err(TrySendError::Disconnected(report)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("dispatch workers gone; dropping {} report", report.kind);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Close the queue and wait up to the grace period for workers to drain it.
    ///
    /// Workers still busy after the grace period are detached.
    pub fn shutdown(&mut self) -> DispatchStats {
        self.tx.take();
        let deadline = Instant::now() + self.grace;
        while self.workers.iter().any(|w| !w.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let mut detached = 0;
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("dispatch worker panicked");
                }
            } else {
                detached += 1;
            }
        }
        if detached > 0 {
            log::warn!("{} dispatch workers still busy after shutdown grace", detached);
        }
        self.stats()
    }
}

impl Drop for ReportDispatcher {
    fn drop(&mut self) {
        self.tx.take();
    }
}

fn worker_loop(
    rx: Arc<Mutex<Receiver<IncidentReport>>>,
    sink: Arc<dyn ReportSink>,
    counters: Arc<Counters>,
) {
    loop {
        let next = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => {
                log::error!("dispatch queue lock poisoned; worker exiting");
                return;
            }
        };
        let Ok(report) = next else {
            return;
        };
        match sink.send(&report) {
            Ok(()) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "reported {} for subject {} ({})",
                    report.kind,
                    report.subject_id,
                    report.description
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "failed to report {} for subject {} via {}: {}",
                    report.kind,
                    report.subject_id,
                    sink.name(),
                    e
                );
            }
        }
    }
}
