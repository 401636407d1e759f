//! Path-scoped access rules for tidepool.
//!
//! A rule set is an ordered list of `(path pattern, per-operation
//! expression)` entries. Authorization evaluates the request path against
//! each pattern in declaration order; the first match decides, even when a
//! later pattern is more specific. The expressions are interpreted by a
//! small fixed-grammar evaluator — never by a host-language runtime.
//!
//! The failure policy is uniformly deny: no matching rule, no expression
//! for the operation, a parse already rejected at compile time, or any
//! evaluation error all yield `false`.

pub mod engine;
pub mod error;
pub mod expr;
pub mod pattern;

pub use engine::{Operation, RuleDef, RuleSet};
pub use error::{Error, Result};
