//! SQLite backend for the tidepool document store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Failures surface as
//! [`tidepool_core::Error`] so callers can distinguish conflicts and
//! absences from storage faults.

mod apply;
mod encode;
mod query;
mod schema;
mod store;

pub use store::SqliteStore;

#[cfg(test)]
mod tests;
