//! The rule set: ordered rules, first-match-wins, default deny.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  error::Result,
  expr::{self, EvalContext, Expr},
  pattern::Pattern,
};

/// The operation classes a rule can authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Read,
  Write,
  Delete,
}

impl Operation {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Read => "read",
      Self::Write => "write",
      Self::Delete => "delete",
    }
  }
}

/// One rule as configured — pattern source plus optional expression source
/// per operation. An absent expression denies that operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
  #[serde(rename = "match")]
  pub pattern: String,
  pub read:    Option<String>,
  pub write:   Option<String>,
  pub delete:  Option<String>,
}

struct Rule {
  pattern: Pattern,
  read:    Option<Expr>,
  write:   Option<Expr>,
  delete:  Option<Expr>,
}

/// An ordered, compiled rule list.
///
/// Patterns may overlap (e.g. `{collection}` and `{collection}/{id}`);
/// evaluation is strictly in declaration order and the first matching
/// pattern decides, even if a later one is more specific.
pub struct RuleSet {
  rules: Vec<Rule>,
}

impl RuleSet {
  /// Compile rule definitions. Fails fast on any bad pattern or
  /// expression so misconfigurations surface at startup, not as silent
  /// denials.
  pub fn compile(defs: &[RuleDef]) -> Result<Self> {
    let mut rules = Vec::with_capacity(defs.len());
    for def in defs {
      rules.push(Rule {
        pattern: Pattern::parse(&def.pattern)?,
        read:    def.read.as_deref().map(expr::parse).transpose()?,
        write:   def.write.as_deref().map(expr::parse).transpose()?,
        delete:  def.delete.as_deref().map(expr::parse).transpose()?,
      });
    }
    Ok(Self { rules })
  }

  /// A rule set that denies everything.
  pub fn deny_all() -> Self {
    Self { rules: Vec::new() }
  }

  /// Evaluate `(path, operation, auth)`. Any failure — no matching rule,
  /// no expression, evaluation error, non-boolean result — denies.
  pub fn allows(&self, path: &str, operation: Operation, auth: &Value) -> bool {
    let segments: Vec<&str> =
      path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
      return false;
    }

    for rule in &self.rules {
      let Some(bindings) = rule.pattern.matches(&segments) else {
        continue;
      };
      let expr = match operation {
        Operation::Read => rule.read.as_ref(),
        Operation::Write => rule.write.as_ref(),
        Operation::Delete => rule.delete.as_ref(),
      };
      let Some(expr) = expr else {
        return false;
      };
      let ctx = EvalContext { auth, bindings: &bindings };
      return matches!(expr::eval(expr, &ctx), Ok(Value::Bool(true)));
    }

    false
  }
}
