//! # Provenance Ledger
//!
//! Tamper-evident audit ledger for healthcare provider data:
//! - **Ledger**: sanitized transactions, Merkle roots, proof-of-work sealed blocks
//! - **Service**: shared async handle with background sealing
//! - **Store**: snapshot persistence with replay verification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provenance_ledger::config::LedgerConfig;
//! use provenance_ledger::ledger::RawEvent;
//! use provenance_ledger::service::ProvenanceService;
//!
//! #[tokio::main]
//! async fn main() -> provenance_ledger::Result<()> {
//!     let service = ProvenanceService::new(LedgerConfig::default())?;
//!
//!     let event = RawEvent::new("data_update", Some("P1"), "agentA")
//!         .with_field("city", "Mumbai");
//!     service.append(event).await?;
//!
//!     if let Some(block) = service.request_seal().await? {
//!         println!("Sealed block {} ({})", block.index, block.hash);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod ledger;
pub mod monitoring;
pub mod service;
pub mod store;

pub use core::error::{Error, Result};
