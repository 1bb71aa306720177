//! costwatch-state — run history and notification de-duplication.
//!
//! Backed by [redb](https://docs.rs/redb). Persistent when a state path is
//! configured, in-memory otherwise (a `watch` process still de-duplicates
//! within its own lifetime).
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{date}:{nanos}`, `{date}:{channel}`) keep one report
//! date's records adjacent for prefix scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod record;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use record::{NotificationMark, RunRecord};
pub use store::StateStore;
