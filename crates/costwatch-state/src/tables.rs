//! redb table definitions for the costwatch state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Keys start with the ISO report date so a prefix scan finds one day.

use redb::TableDefinition;

/// Run records keyed by `{report_date}:{started_at_nanos}` (zero-padded).
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Delivered notifications keyed by `{report_date}:{channel}`.
pub const NOTIFICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("notifications");
