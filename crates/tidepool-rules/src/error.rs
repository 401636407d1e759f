//! Error type for `tidepool-rules`.
//!
//! Only rule *compilation* produces errors; evaluation failures are
//! swallowed into a deny by the engine.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
  #[error("invalid pattern {pattern:?}: {reason}")]
  Pattern { pattern: String, reason: String },

  #[error("invalid expression {expr:?}: {reason}")]
  Expr { expr: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
