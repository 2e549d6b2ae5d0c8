//! Ledger persistence.
//!
//! Stores hold a [`LedgerSnapshot`](crate::ledger::LedgerSnapshot) and know
//! nothing about verification; loaders always replay the chain.

pub mod backend;
pub mod file;
pub mod memory;

pub use backend::{ChainStore, StoreType};
pub use file::JsonFileStore;
pub use memory::MemoryStore;
