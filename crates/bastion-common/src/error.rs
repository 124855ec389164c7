//! Common error types for Bastion components.

use thiserror::Error;

/// Errors surfaced by the challenge gate
#[derive(Debug, Error)]
pub enum GateError {
    /// Challenge feature is turned off for the resolved scope
    #[error("Challenge is disabled for this host")]
    ChallengeDisabled,

    /// Challenge is enabled but no provider secret key is stored
    #[error("No CAPTCHA secret key is configured")]
    MissingSecretKey,

    /// Bypass token was absent, expired, revoked, or out of scope.
    /// Sub-reasons are never distinguished outward.
    #[error("Token is not valid")]
    InvalidToken,

    /// Provider rejected the solution, the score was below the
    /// threshold, or the provider could not be reached
    #[error("CAPTCHA verification failed")]
    VerificationFailed,

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store unreachable or unreadable
    #[error("Store error: {0}")]
    Store(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ChallengeDisabled => 503,
            Self::MissingSecretKey => 503,
            Self::InvalidToken => 401,
            Self::VerificationFailed => 401,
            Self::InvalidInput(_) => 400,
            Self::Store(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_and_unconfigured_are_distinct_from_invalid_token() {
        assert_eq!(GateError::ChallengeDisabled.status_code(), 503);
        assert_eq!(GateError::MissingSecretKey.status_code(), 503);
        assert_eq!(GateError::InvalidToken.status_code(), 401);
        assert_ne!(
            GateError::ChallengeDisabled.to_string(),
            GateError::MissingSecretKey.to_string()
        );
    }

    #[test]
    fn store_errors_are_retryable() {
        assert!(GateError::Store("down".into()).is_retryable());
        assert!(!GateError::VerificationFailed.is_retryable());
    }
}
