//! Broker token issuance.
//!
//! Clients present these short-lived bearer tokens to the pub/sub broker
//! when opening subscriptions. This is the only component that holds the
//! signing key; the broker is provisioned with the verifying key.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64};
use chrono::Utc;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Claims carried by a broker token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
  /// The asserted user identity.
  pub sub: String,
  /// Issued-at, unix seconds.
  pub iat: i64,
  /// Expiry, unix seconds.
  pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
  #[error("malformed token")]
  Malformed,
  #[error("bad signature")]
  BadSignature,
  #[error("token expired")]
  Expired,
}

/// Signs and verifies broker tokens. Wire format is
/// `base64url(claims-json).base64url(signature)`.
pub struct TokenIssuer {
  key: SigningKey,
}

impl TokenIssuer {
  pub fn new(key: SigningKey) -> Self {
    Self { key }
  }

  /// Generate a fresh random key — used for tests and first start.
  pub fn generate() -> Self {
    Self { key: SigningKey::generate(&mut rand_core::OsRng) }
  }

  /// Load the 32-byte seed from `path`, generating and persisting one if
  /// the file does not exist yet.
  pub fn load_or_generate(path: &Path) -> std::io::Result<Self> {
    match std::fs::read(path) {
      Ok(bytes) => {
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
          std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("signing key at {path:?} is not 32 bytes"),
          )
        })?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        let issuer = Self::generate();
        std::fs::write(path, issuer.key.to_bytes())?;
        Ok(issuer)
      }
      Err(e) => Err(e),
    }
  }

  /// The key the broker needs to validate tokens.
  pub fn verifying_key(&self) -> VerifyingKey {
    self.key.verifying_key()
  }

  /// Issue a token asserting `user_id` for the next 24 hours.
  pub fn issue(&self, user_id: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
      sub: user_id.to_owned(),
      iat: now,
      exp: now + TOKEN_TTL_SECS,
    };
    let body = serde_json::to_vec(&claims).expect("claims serialize");
    let signature = self.key.sign(&body);
    format!("{}.{}", B64.encode(&body), B64.encode(signature.to_bytes()))
  }

  /// Validate a token and return its claims. Mirrors what the broker does;
  /// exercised here by tests.
  pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
    let (body_b64, sig_b64) =
      token.split_once('.').ok_or(TokenError::Malformed)?;
    let body = B64.decode(body_b64).map_err(|_| TokenError::Malformed)?;
    let sig_bytes: [u8; 64] = B64
      .decode(sig_b64)
      .map_err(|_| TokenError::Malformed)?
      .try_into()
      .map_err(|_| TokenError::Malformed)?;

    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    self
      .key
      .verifying_key()
      .verify(&body, &signature)
      .map_err(|_| TokenError::BadSignature)?;

    let claims: Claims =
      serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)?;
    if claims.exp <= Utc::now().timestamp() {
      return Err(TokenError::Expired);
    }
    Ok(claims)
  }
}
