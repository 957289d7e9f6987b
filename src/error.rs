//! Error taxonomy produced at the remote data-source boundary.
//!
//! The cache layer decides between `Paused` and `Error` by matching on
//! [`ErrorKind`], so every failure leaving a data source must be classified
//! here rather than inspected by message later.

use thiserror::Error;

/// A typed failure from a fetch attempt.
///
/// `Clone` because a single in-flight attempt is shared between every caller
/// that requested the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Transport-level failure: connection refused, DNS, timeout.
  #[error("network error: {0}")]
  Network(String),

  /// The backend rejected our credentials or the row-level policy denied access.
  #[error("not authorized: {0}")]
  Auth(String),

  #[error("not found: {0}")]
  NotFound(String),

  /// Malformed filter, unknown column, or a row that failed to decode.
  #[error("invalid query: {0}")]
  Validation(String),

  #[error("{0}")]
  Unknown(String),
}

/// Discriminant of [`FetchError`] for policy matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Network,
  Auth,
  NotFound,
  Validation,
  Unknown,
}

impl FetchError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      FetchError::Network(_) => ErrorKind::Network,
      FetchError::Auth(_) => ErrorKind::Auth,
      FetchError::NotFound(_) => ErrorKind::NotFound,
      FetchError::Validation(_) => ErrorKind::Validation,
      FetchError::Unknown(_) => ErrorKind::Unknown,
    }
  }

  /// Whether this failure could be explained by losing connectivity.
  pub fn is_network(&self) -> bool {
    self.kind() == ErrorKind::Network
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(e: serde_json::Error) -> Self {
    FetchError::Validation(format!("failed to decode payload: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_matches_variant() {
    assert_eq!(FetchError::Network("x".into()).kind(), ErrorKind::Network);
    assert_eq!(FetchError::Auth("x".into()).kind(), ErrorKind::Auth);
    assert_eq!(FetchError::NotFound("x".into()).kind(), ErrorKind::NotFound);
    assert_eq!(
      FetchError::Validation("x".into()).kind(),
      ErrorKind::Validation
    );
    assert_eq!(FetchError::Unknown("x".into()).kind(), ErrorKind::Unknown);
  }

  #[test]
  fn test_only_network_is_network() {
    assert!(FetchError::Network("refused".into()).is_network());
    assert!(!FetchError::Auth("denied".into()).is_network());
    assert!(!FetchError::Unknown("boom".into()).is_network());
  }

  #[test]
  fn test_decode_error_is_validation() {
    let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
    assert_eq!(FetchError::from(err).kind(), ErrorKind::Validation);
  }
}
