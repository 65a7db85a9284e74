use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced to the error callback of a chat stream
#[derive(Debug, Error)]
pub enum ChatError {
    /// The server answered with a non-success status
    #[error("Ollama API error: {} {reason}", .status.as_u16())]
    Status { status: StatusCode, reason: String },

    /// The request could not be sent (connection refused, DNS, TLS, ...)
    #[error("Ollama request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// The response body stopped being readable mid-stream
    #[error("Response body is not readable: {0}")]
    Body(#[source] reqwest::Error),

    #[error("Invalid base URL '{0}'")]
    InvalidBaseUrl(String),
}

impl ChatError {
    /// Build a status error from a response status, keeping the server's message if any
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let reason = status.canonical_reason().unwrap_or("Unknown status");
        let body = body.trim();
        let reason = if body.is_empty() {
            reason.to_string()
        } else {
            format!("{reason}: {body}")
        };

        ChatError::Status { status, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_includes_reason() {
        let err = ChatError::from_status(StatusCode::NOT_FOUND, "");
        let msg = err.to_string();

        assert!(msg.contains("404"), "expected status in message: {msg}");
        assert!(msg.contains("Not Found"), "expected reason in message: {msg}");
    }

    #[test]
    fn test_status_error_keeps_body() {
        let err = ChatError::from_status(
            StatusCode::NOT_FOUND,
            r#"{"error":"model 'foo' not found"}"#,
        );

        assert!(err.to_string().contains("model 'foo' not found"));
    }
}
