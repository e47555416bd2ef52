//! `famrecon-recon`: multi-pass invoice to bank-credit matching engine.
//!
//! Pure engine crate: receives pre-loaded tables, returns classified results.
//! No CLI or file IO dependencies.

pub mod combinatorial;
pub mod config;
pub mod engine;
pub mod error;
pub mod family;
pub mod grouped;
pub mod ledger;
pub mod loader;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod report;
pub mod table;

pub use config::ReconConfig;
pub use engine::{run, run_tables};
pub use error::ReconError;
pub use family::FamilyResolver;
pub use ledger::MatchLedger;
pub use loader::{load_input, LoadReport};
pub use model::{BankTransaction, FamilyCode, Household, Invoice, MatchKind, MatchRecord, ReconInput, ReconResult};
pub use table::Table;
