//! Async service layer over the ledger.

pub mod provenance;
pub mod worker;

pub use provenance::ProvenanceService;
pub use worker::{SealWorker, SealWorkerHandle, WorkerStats};
