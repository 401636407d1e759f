//! HTTP handlers, one module per resource.

pub mod admin;
pub mod batch;
pub mod documents;
pub mod query;
pub mod sync;
pub mod token;

use serde_json::{Value, json};
use tidepool_rules::{Operation, RuleSet};

use crate::error::ApiError;

/// Workspace used when the caller does not name one.
pub const DEFAULT_WORKSPACE: &str = "default";

pub fn workspace_or_default(workspace_id: Option<String>) -> String {
  workspace_id.unwrap_or_else(|| DEFAULT_WORKSPACE.to_owned())
}

/// The auth context rules evaluate against: the caller-asserted identity.
/// Verification of that identity belongs to the external issuer, not here.
pub fn auth_context(user_id: Option<&str>) -> Value {
  match user_id {
    Some(user) => json!({ "userId": user }),
    None => json!({}),
  }
}

/// Gate one operation on one path; denials are logged at WARN with the
/// context an operator needs to debug a rule set.
pub fn ensure_allowed(
  rules: &RuleSet,
  path: &str,
  operation: Operation,
  auth: &Value,
) -> Result<(), ApiError> {
  if rules.allows(path, operation, auth) {
    Ok(())
  } else {
    tracing::warn!(
      path,
      operation = operation.as_str(),
      user = auth.get("userId").and_then(serde_json::Value::as_str).unwrap_or("<none>"),
      "rules denied request"
    );
    Err(ApiError::Denied)
  }
}
