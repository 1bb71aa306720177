//! costwatch-billing — reads per-service spend from a GCP billing export.
//!
//! # Flow
//!
//! ```text
//! Authenticator (service account JWT | static token | metadata server)
//!   └── BigQueryClient
//!         ├── POST jobs.query with named DATE parameters
//!         ├── poll getQueryResults until jobComplete
//!         └── follow pageToken → Vec<ServiceCost>
//! ```
//!
//! The job talks to the billing source only through [`CostSource`], so
//! tests can substitute a fixed set of rows.

pub mod auth;
pub mod client;
pub mod error;
pub mod query;

use std::future::Future;

use chrono::NaiveDate;
use costwatch_core::ServiceCost;

pub use auth::{Authenticator, ServiceAccountKey};
pub use client::BigQueryClient;
pub use error::{BillingError, BillingResult};

/// A source of per-service cost rows for a report date.
pub trait CostSource {
    /// Rows for every service with spend on `report_date`, with each
    /// service's total over the `baseline_days` preceding it. Ordered by
    /// recent cost, highest first.
    fn service_costs(
        &self,
        report_date: NaiveDate,
        baseline_days: u32,
    ) -> impl Future<Output = BillingResult<Vec<ServiceCost>>> + Send;
}
