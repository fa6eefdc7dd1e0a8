//! HTTP helpers shared by the model API clients

use std::time::Duration;

use kgraph_core::{KgError, LlmFailure};
use reqwest::Client;

/// Default OpenAI API root
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client with a request timeout of at least one second
pub fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_default()
}

/// Map a transport error onto a failure class
pub fn transport_error(context: &str, e: reqwest::Error) -> KgError {
    let kind = if e.is_timeout() {
        LlmFailure::Timeout
    } else {
        LlmFailure::Unavailable
    };
    KgError::llm(kind, format!("{context}: {e}"))
}

/// Classify a non-success response by status, keeping the body for the log
pub async fn error_from_response(context: &str, response: reqwest::Response) -> KgError {
    let status = response.status().as_u16();
    let error_text = response.text().await.unwrap_or_default();
    KgError::llm(
        LlmFailure::from_status(status),
        format!("{context} ({status}): {error_text}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_retryable() {
        let err = http_client(1)
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();

        let err = transport_error("Request failed", err);
        assert!(matches!(
            err,
            KgError::Llm {
                kind: LlmFailure::Unavailable,
                ..
            }
        ));
        assert!(err.is_retryable());
    }
}
