//! The rule expression language: tokenizer, recursive-descent parser, and
//! evaluator.
//!
//! The vocabulary is fixed: boolean and string literals, `null`, equality
//! and inequality, `&&`/`||`/`!`, parentheses, dotted dereference into the
//! auth context (`auth.userId`), and the variables bound by the matched
//! path pattern. Anything else fails to parse, and a rule that fails to
//! parse denies.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};

// ─── AST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Bool(bool),
  Str(String),
  Null,
  /// A dotted reference: `auth.userId` or a bound pattern variable.
  Var(Vec<String>),
  Not(Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
  Eq(Box<Expr>, Box<Expr>),
  Ne(Box<Expr>, Box<Expr>),
}

// ─── Tokenizer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  EqEq,
  NotEq,
  AndAnd,
  OrOr,
  Bang,
  Dot,
  LParen,
  RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
  let err = |reason: String| Error::Expr { expr: src.to_owned(), reason };
  let mut tokens = Vec::new();
  let mut chars = src.chars().peekable();

  while let Some(&c) = chars.peek() {
    match c {
      c if c.is_whitespace() => {
        chars.next();
      }
      '(' => {
        chars.next();
        tokens.push(Token::LParen);
      }
      ')' => {
        chars.next();
        tokens.push(Token::RParen);
      }
      '.' => {
        chars.next();
        tokens.push(Token::Dot);
      }
      '=' => {
        chars.next();
        if chars.next() != Some('=') {
          return Err(err("expected `==`".into()));
        }
        tokens.push(Token::EqEq);
      }
      '!' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::NotEq);
        } else {
          tokens.push(Token::Bang);
        }
      }
      '&' => {
        chars.next();
        if chars.next() != Some('&') {
          return Err(err("expected `&&`".into()));
        }
        tokens.push(Token::AndAnd);
      }
      '|' => {
        chars.next();
        if chars.next() != Some('|') {
          return Err(err("expected `||`".into()));
        }
        tokens.push(Token::OrOr);
      }
      '\'' | '"' => {
        let quote = c;
        chars.next();
        let mut s = String::new();
        loop {
          match chars.next() {
            Some(ch) if ch == quote => break,
            Some(ch) => s.push(ch),
            None => return Err(err("unterminated string literal".into())),
          }
        }
        tokens.push(Token::Str(s));
      }
      c if c.is_ascii_alphabetic() || c == '_' => {
        let mut ident = String::new();
        while let Some(&ch) = chars.peek() {
          if ch.is_ascii_alphanumeric() || ch == '_' {
            ident.push(ch);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Ident(ident));
      }
      other => return Err(err(format!("unexpected character {other:?}"))),
    }
  }

  Ok(tokens)
}

// ─── Parser ──────────────────────────────────────────────────────────────────

struct Parser<'a> {
  src:    &'a str,
  tokens: Vec<Token>,
  pos:    usize,
}

impl<'a> Parser<'a> {
  fn err(&self, reason: impl Into<String>) -> Error {
    Error::Expr { expr: self.src.to_owned(), reason: reason.into() }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn bump(&mut self) -> Option<Token> {
    let t = self.tokens.get(self.pos).cloned();
    if t.is_some() {
      self.pos += 1;
    }
    t
  }

  fn eat(&mut self, token: &Token) -> bool {
    if self.peek() == Some(token) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  // or := and ( '||' and )*
  fn or(&mut self) -> Result<Expr> {
    let mut lhs = self.and()?;
    while self.eat(&Token::OrOr) {
      let rhs = self.and()?;
      lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  // and := equality ( '&&' equality )*
  fn and(&mut self) -> Result<Expr> {
    let mut lhs = self.equality()?;
    while self.eat(&Token::AndAnd) {
      let rhs = self.equality()?;
      lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  // equality := unary ( ('==' | '!=') unary )?
  fn equality(&mut self) -> Result<Expr> {
    let lhs = self.unary()?;
    if self.eat(&Token::EqEq) {
      let rhs = self.unary()?;
      return Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)));
    }
    if self.eat(&Token::NotEq) {
      let rhs = self.unary()?;
      return Ok(Expr::Ne(Box::new(lhs), Box::new(rhs)));
    }
    Ok(lhs)
  }

  // unary := '!' unary | primary
  fn unary(&mut self) -> Result<Expr> {
    if self.eat(&Token::Bang) {
      return Ok(Expr::Not(Box::new(self.unary()?)));
    }
    self.primary()
  }

  // primary := literal | var | '(' or ')'
  fn primary(&mut self) -> Result<Expr> {
    match self.bump() {
      Some(Token::LParen) => {
        let inner = self.or()?;
        if !self.eat(&Token::RParen) {
          return Err(self.err("expected `)`"));
        }
        Ok(inner)
      }
      Some(Token::Str(s)) => Ok(Expr::Str(s)),
      Some(Token::Ident(first)) => match first.as_str() {
        "true" => Ok(Expr::Bool(true)),
        "false" => Ok(Expr::Bool(false)),
        "null" => Ok(Expr::Null),
        _ => {
          let mut parts = vec![first];
          while self.eat(&Token::Dot) {
            match self.bump() {
              Some(Token::Ident(next)) => parts.push(next),
              _ => return Err(self.err("expected identifier after `.`")),
            }
          }
          Ok(Expr::Var(parts))
        }
      },
      other => Err(self.err(format!("unexpected token {other:?}"))),
    }
  }
}

/// Parse an expression source string into an AST.
pub fn parse(src: &str) -> Result<Expr> {
  let tokens = tokenize(src)?;
  let mut parser = Parser { src, tokens, pos: 0 };
  let expr = parser.or()?;
  if parser.pos != parser.tokens.len() {
    return Err(parser.err("trailing tokens"));
  }
  Ok(expr)
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

/// Evaluation failure. The engine collapses these into a deny; the variants
/// exist for tests and logging.
#[derive(Debug, PartialEq, Eq)]
pub enum EvalError {
  /// A bare identifier that is neither `auth` nor a bound path variable.
  Unresolved(String),
  /// The expression (or an operand of `!`/`&&`/`||`) was not a boolean.
  NotBoolean,
}

/// What a rule expression evaluates against: the auth context plus the
/// variables bound by the matched pattern.
pub struct EvalContext<'a> {
  pub auth:     &'a Value,
  pub bindings: &'a HashMap<String, String>,
}

fn resolve(parts: &[String], ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
  if parts[0] == "auth" {
    // Dotted dereference into the auth context; missing keys resolve to
    // null so `auth.x != null` works as a presence check.
    let mut current = ctx.auth;
    for part in &parts[1..] {
      current = match current.get(part) {
        Some(v) => v,
        None => return Ok(Value::Null),
      };
    }
    return Ok(current.clone());
  }
  if parts.len() == 1 {
    if let Some(bound) = ctx.bindings.get(&parts[0]) {
      return Ok(Value::String(bound.clone()));
    }
  }
  Err(EvalError::Unresolved(parts.join(".")))
}

fn truthy(v: &Value) -> Result<bool, EvalError> {
  v.as_bool().ok_or(EvalError::NotBoolean)
}

/// Evaluate an expression. Short-circuits `&&` and `||`.
pub fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
  Ok(match expr {
    Expr::Bool(b) => Value::Bool(*b),
    Expr::Str(s) => Value::String(s.clone()),
    Expr::Null => Value::Null,
    Expr::Var(parts) => resolve(parts, ctx)?,
    Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, ctx)?)?),
    Expr::And(lhs, rhs) => {
      if truthy(&eval(lhs, ctx)?)? {
        Value::Bool(truthy(&eval(rhs, ctx)?)?)
      } else {
        Value::Bool(false)
      }
    }
    Expr::Or(lhs, rhs) => {
      if truthy(&eval(lhs, ctx)?)? {
        Value::Bool(true)
      } else {
        Value::Bool(truthy(&eval(rhs, ctx)?)?)
      }
    }
    Expr::Eq(lhs, rhs) => Value::Bool(eval(lhs, ctx)? == eval(rhs, ctx)?),
    Expr::Ne(lhs, rhs) => Value::Bool(eval(lhs, ctx)? != eval(rhs, ctx)?),
  })
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn run(src: &str, auth: Value, bindings: &[(&str, &str)]) -> Result<Value, EvalError> {
    let bindings: HashMap<String, String> = bindings
      .iter()
      .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
      .collect();
    let expr = parse(src).expect("parse");
    eval(&expr, &EvalContext { auth: &auth, bindings: &bindings })
  }

  #[test]
  fn literals() {
    assert_eq!(run("true", json!({}), &[]), Ok(json!(true)));
    assert_eq!(run("false || true", json!({}), &[]), Ok(json!(true)));
    assert_eq!(run("!false", json!({}), &[]), Ok(json!(true)));
  }

  #[test]
  fn auth_deref_and_binding_equality() {
    let auth = json!({"userId": "alice"});
    assert_eq!(
      run("auth.userId == userId", auth.clone(), &[("userId", "alice")]),
      Ok(json!(true))
    );
    assert_eq!(
      run("auth.userId == userId", auth, &[("userId", "bob")]),
      Ok(json!(false))
    );
  }

  #[test]
  fn null_checks() {
    assert_eq!(
      run("auth.userId != null", json!({"userId": "u"}), &[]),
      Ok(json!(true))
    );
    assert_eq!(run("auth.userId != null", json!({}), &[]), Ok(json!(false)));
    assert_eq!(run("auth.missing == null", json!({}), &[]), Ok(json!(true)));
  }

  #[test]
  fn precedence_and_parens() {
    // `&&` binds tighter than `||`.
    assert_eq!(
      run("true || false && false", json!({}), &[]),
      Ok(json!(true))
    );
    assert_eq!(
      run("(true || false) && false", json!({}), &[]),
      Ok(json!(false))
    );
  }

  #[test]
  fn string_literals_both_quotes() {
    assert_eq!(run("'a' == \"a\"", json!({}), &[]), Ok(json!(true)));
  }

  #[test]
  fn unresolved_variable_is_an_error() {
    assert_eq!(
      run("mystery == 'x'", json!({}), &[]),
      Err(EvalError::Unresolved("mystery".into()))
    );
  }

  #[test]
  fn non_boolean_result_is_detected() {
    let value = run("'hello'", json!({}), &[]).unwrap();
    assert_eq!(truthy(&value), Err(EvalError::NotBoolean));
  }

  #[test]
  fn unknown_syntax_fails_to_parse() {
    assert!(parse("1 + 2").is_err());
    assert!(parse("auth.userId = 'x'").is_err());
    assert!(parse("f(x)").is_err());
    assert!(parse("a ==").is_err());
  }

  #[test]
  fn and_short_circuits_before_errors() {
    assert_eq!(run("false && mystery", json!({}), &[]), Ok(json!(false)));
  }
}
