//! Errors surfaced by an [`LlmClient`](super::LlmClient)
//!
//! The engine only distinguishes rate limits, which it waits out, from
//! everything else, which ends the run.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider asked us to slow down, optionally saying for how long
    #[error("Rate limited by provider{}", wait_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),

    #[error("No LLM provider configured")]
    NotConfigured,
}

impl LlmError {
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Wait the provider asked for, if it gave one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn wait_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_hint() {
        let err = LlmError::rate_limited(Some(Duration::from_secs(42)));
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 42s");

        let err = LlmError::rate_limited(None);
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.to_string(), "Rate limited by provider");
    }

    #[test]
    fn test_other_errors_carry_no_wait() {
        let err = LlmError::Provider {
            status: 529,
            message: "overloaded".to_string(),
        };
        assert!(!err.is_rate_limit());
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.to_string(), "Provider returned 529: overloaded");
    }
}
