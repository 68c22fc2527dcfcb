//! Failure taxonomy for remote operations.
//!
//! Every remote call resolves to one of these categories so callers can
//! distinguish "not there" from "not allowed" from "try again later". The
//! variants carry strings rather than source errors so the type is `Clone`,
//! which lets the cache hand the same failure to every coalesced waiter.

use reqwest::StatusCode;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Typed failure for any remote-resource operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
  /// The requested resource does not exist.
  #[error("resource not found")]
  NotFound,

  /// No session, or the session does not permit the operation.
  #[error("unauthorized")]
  Unauthorized,

  /// Rejected before or by the platform on schema/content grounds.
  #[error("validation rejected: {0}")]
  Validation(String),

  /// Network failure, timeout, or backend unavailability.
  #[error("transport failure: {0}")]
  Transport(String),

  /// Configuration could not be loaded or is incomplete.
  #[error("configuration error: {0}")]
  Config(String),
}

impl Error {
  /// Map an HTTP response status to the failure taxonomy.
  ///
  /// `detail` is the platform's error message, kept for validation failures
  /// where the caller may want to show it.
  pub fn from_status(status: StatusCode, detail: &str) -> Self {
    match status {
      StatusCode::NOT_FOUND => Error::NotFound,
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized,
      s if s.is_client_error() => Error::Validation(detail.to_string()),
      _ => Error::Transport(format!("{}: {}", status, detail)),
    }
  }

  /// True for failures worth showing to the user verbatim.
  pub fn is_validation(&self) -> bool {
    matches!(self, Error::Validation(_))
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    if e.is_status() {
      // Status-bearing errors are mapped at the call site where the body is
      // available; this is the fallback.
      match e.status() {
        Some(s) => Error::from_status(s, "request failed"),
        None => Error::Transport(e.to_string()),
      }
    } else {
      Error::Transport(e.to_string())
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Validation(format!("malformed document: {}", e))
  }
}
