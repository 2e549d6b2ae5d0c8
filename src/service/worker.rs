//! Background sealing.
//!
//! The worker wakes when appends cross the seal threshold or on a periodic
//! tick, and seals whatever is pending. Exhausted seals are retried a few
//! times; after that the failure is escalated and the transactions wait for
//! the next wake-up.

use crate::config::WorkerConfig;
use crate::core::Error;
use crate::service::provenance::ProvenanceService;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Counters exposed by a running worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    blocks_sealed: AtomicU64,
    retries: AtomicU64,
    escalations: AtomicU64,
}

impl WorkerStats {
    pub fn blocks_sealed(&self) -> u64 {
        self.blocks_sealed.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Seals given up on after exhausting every retry.
    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }
}

/// Background task that seals pending transactions.
pub struct SealWorker {
    service: ProvenanceService,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    shutdown: watch::Receiver<bool>,
}

/// Handle used to stop a running worker.
#[derive(Debug)]
pub struct SealWorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<WorkerStats>,
}

impl SealWorkerHandle {
    /// Worker counters.
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Signal the worker and wait for it to finish its current seal.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Seal worker terminated abnormally");
        }
    }
}

impl SealWorker {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(service: ProvenanceService, config: WorkerConfig) -> SealWorkerHandle {
        let (tx, rx) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());
        let worker = Self {
            service,
            config,
            stats: stats.clone(),
            shutdown: rx,
        };
        let task = tokio::spawn(worker.run());
        SealWorkerHandle {
            shutdown: tx,
            task,
            stats,
        }
    }

    async fn run(mut self) {
        info!(
            interval_ms = self.config.seal_interval_ms,
            threshold = self.config.seal_threshold,
            "Seal worker started"
        );
        let mut ticker = tokio::time::interval(self.config.seal_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.seal_with_retry().await,
                _ = self.service.seal_wanted() => self.seal_with_retry().await,
            }
        }
        info!("Seal worker stopped");
    }

    async fn seal_with_retry(&self) {
        let mut retries = 0;
        loop {
            match self.service.request_seal().await {
                Ok(Some(sealed)) => {
                    self.stats.blocks_sealed.fetch_add(1, Ordering::Relaxed);
                    debug!(index = sealed.index, "Worker sealed block");
                    return;
                }
                Ok(None) | Err(Error::SealInProgress) => return,
                Err(e @ Error::NotPersisted { .. }) => {
                    self.stats.blocks_sealed.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Worker sealed block but the store is behind");
                    return;
                }
                Err(e @ Error::SealExhausted { .. }) if retries < self.config.max_retries => {
                    retries += 1;
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(retry = retries, error = %e, "Seal exhausted, retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                    if *self.shutdown.borrow() {
                        return;
                    }
                }
                Err(e @ Error::SealExhausted { .. }) => {
                    self.stats.escalations.fetch_add(1, Ordering::Relaxed);
                    error!(
                        retries,
                        error = %e,
                        "Sealing escalated, transactions remain pending"
                    );
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Seal failed");
                    return;
                }
            }
        }
    }
}
