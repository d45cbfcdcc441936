//! Contract for the chat-completion service.
//!
//! The HTTP client itself lives outside relay; anything implementing
//! [`ChatCompletion`] can be plugged in. Every failure reaches the caller as
//! one [`ServiceError`] with a short, specific reason.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFailure {
    Authentication,
    Quota,
    RateLimited,
    Network,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub failure: ServiceFailure,
    /// Raw message from the client library.
    pub detail: String,
}

impl ServiceError {
    /// Map a client library's error text to a failure reason.
    pub fn classify(message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let failure = if has(&["credit", "quota", "billing"]) {
            ServiceFailure::Quota
        } else if has(&["401", "403", "authentication", "api key", "unauthorized"]) {
            ServiceFailure::Authentication
        } else if has(&["429", "rate limit", "rate_limit", "too many requests"]) {
            ServiceFailure::RateLimited
        } else if has(&["timed out", "timeout", "connection", "dns", "network", "unreachable"]) {
            ServiceFailure::Network
        } else {
            ServiceFailure::Other
        };
        Self { failure, detail }
    }

    pub fn user_message(&self) -> String {
        match self.failure {
            ServiceFailure::Authentication => "invalid API key: check the service credentials".to_string(),
            ServiceFailure::Quota => "quota exhausted: check the account's credits".to_string(),
            ServiceFailure::RateLimited => "rate limited: wait a moment and try again".to_string(),
            ServiceFailure::Network => format!("network error: {}", self.detail),
            ServiceFailure::Other => format!("service error: {}", self.detail),
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for ServiceError {}

/// A request/response chat service. Implementations may block.
pub trait ChatCompletion: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_failures() {
        let cases = [
            ("Error code: 401 - invalid x-api-key", ServiceFailure::Authentication),
            ("Your credit balance is too low", ServiceFailure::Quota),
            ("insufficient_quota", ServiceFailure::Quota),
            ("429 Too Many Requests", ServiceFailure::RateLimited),
            ("connection reset by peer", ServiceFailure::Network),
            ("model overloaded", ServiceFailure::Other),
        ];
        for (message, expected) in cases {
            assert_eq!(ServiceError::classify(message).failure, expected, "{message}");
        }
    }

    #[test]
    fn display_is_short_and_specific() {
        let err = ServiceError::classify("rate_limit_error");
        assert_eq!(err.to_string(), "rate limited: wait a moment and try again");
        let other = ServiceError::classify("boom");
        assert_eq!(other.to_string(), "service error: boom");
    }
}
