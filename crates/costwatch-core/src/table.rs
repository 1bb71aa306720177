//! Billing export table identifiers.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// GCP project ids: 6-30 chars, lowercase letters, digits, hyphens.
/// Domain-scoped projects (`example.com:proj`) are accepted too.
static PROJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9.-]+:)?[a-z][a-z0-9-]{4,28}[a-z0-9]$").expect("valid project regex")
});

/// Dataset and table names: letters, digits, underscores.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,1024}$").expect("valid name regex"));

/// A fully-qualified BigQuery table: `project.dataset.table`.
///
/// The table is interpolated into SQL (BigQuery cannot bind table names as
/// parameters), so every component is validated on parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingTable {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("billing table must be `project.dataset.table`, got: {0}")]
    Shape(String),
    #[error("invalid project id in billing table: {0}")]
    Project(String),
    #[error("invalid dataset or table name in billing table: {0}")]
    Name(String),
}

impl BillingTable {
    pub fn parse(raw: &str) -> Result<Self, TableError> {
        let trimmed = raw.trim().trim_matches('`');
        let mut parts = trimmed.rsplitn(3, '.');
        let (table, dataset, project) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(d), Some(p)) => (t, d, p),
            _ => return Err(TableError::Shape(raw.to_string())),
        };

        if !PROJECT_RE.is_match(project) {
            return Err(TableError::Project(project.to_string()));
        }
        for name in [dataset, table] {
            if !NAME_RE.is_match(name) {
                return Err(TableError::Name(name.to_string()));
            }
        }

        Ok(BillingTable {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }

    /// Backtick-quoted form for use in a `FROM` clause.
    pub fn quoted(&self) -> String {
        format!("`{self}`")
    }
}

impl fmt::Display for BillingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_standard_export_table() {
        let t = BillingTable::parse("my-billing-proj.billing_export.gcp_billing_export_v1_0123AB_CDEF")
            .unwrap();
        assert_eq!(t.project, "my-billing-proj");
        assert_eq!(t.dataset, "billing_export");
        assert_eq!(t.table, "gcp_billing_export_v1_0123AB_CDEF");
        assert_eq!(
            t.quoted(),
            "`my-billing-proj.billing_export.gcp_billing_export_v1_0123AB_CDEF`"
        );
    }

    #[test]
    fn parse_strips_backticks() {
        let t = BillingTable::parse("`acme-prod.billing.export`").unwrap();
        assert_eq!(t.to_string(), "acme-prod.billing.export");
    }

    #[test]
    fn parse_domain_scoped_project() {
        let t = BillingTable::parse("example.com:acme-prod.billing.export").unwrap();
        assert_eq!(t.project, "example.com:acme-prod");
    }

    #[test]
    fn parse_rejects_two_parts() {
        assert!(matches!(
            BillingTable::parse("dataset.table"),
            Err(TableError::Shape(_))
        ));
    }

    #[test]
    fn parse_rejects_injection() {
        let err = BillingTable::parse("acme-prod.billing.export` WHERE 1=1; --").unwrap_err();
        assert!(matches!(err, TableError::Name(_)));
    }

    #[test]
    fn parse_rejects_uppercase_project() {
        assert!(matches!(
            BillingTable::parse("Acme-Prod.billing.export"),
            Err(TableError::Project(_))
        ));
    }
}
