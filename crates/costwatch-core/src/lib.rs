//! costwatch-core — the pieces of a cost anomaly run that don't talk to
//! the network: settings, billing table identifiers, domain types, the
//! threshold detector, and message formatting.

pub mod config;
pub mod detector;
pub mod report;
pub mod table;
pub mod types;

pub use config::{ConfigError, CostwatchConfig, CredentialSource, Secret, Settings};
pub use detector::{Detector, Thresholds};
pub use table::{BillingTable, TableError};
pub use types::*;
