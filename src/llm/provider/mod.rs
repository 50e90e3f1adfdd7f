//! LLM Provider implementations and factory
//!
//! Submodules implement the HTTP provider families (OpenAI, Azure OpenAI,
//! Gemini); Ollama lives in `llm::ollama`. The helpers here map transport and
//! status failures onto the gateway's error taxonomy.

pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::core::config::{ProviderKind, ProviderSettings};
use crate::core::{ProviderError, Result};
use crate::llm::traits::LLMProvider;
use crate::llm::OllamaClient;

use self::gemini::GeminiProvider;
use self::openai::OpenAiProvider;

/// Create a new LLM provider for one entry of the provider table
pub fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match settings.kind {
        ProviderKind::Ollama => Arc::new(OllamaClient::from_settings(settings)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::openai(settings)?),
        ProviderKind::Azure => Arc::new(OpenAiProvider::azure(settings)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::from_settings(settings)?),
    };
    Ok(provider)
}

/// HTTP client shared by the adapters
pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// A request that never got a response
pub(crate) fn send_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Unavailable(format!("{} request timed out", provider))
    } else if err.is_connect() {
        ProviderError::Unavailable(format!("cannot connect to {}: {}", provider, err))
    } else {
        ProviderError::Unavailable(format!("{} request failed: {}", provider, err))
    }
}

/// Map a non-success status onto the taxonomy
///
/// Auth failures, 408 and 5xx are transient; every other 4xx is a rejection.
pub(crate) fn classify_status(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let detail = if body.is_empty() {
        format!("{} returned {}", provider, status)
    } else {
        format!("{} returned {}: {}", provider, status, body)
    };

    match status.as_u16() {
        401 | 403 => ProviderError::Unavailable(format!("authentication failed: {}", detail)),
        408 => ProviderError::Unavailable(detail),
        s if s >= 500 => ProviderError::Unavailable(detail),
        _ => ProviderError::Rejected(detail),
    }
}

/// Check the status, then decode the JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &str,
    response: Response,
) -> std::result::Result<T, ProviderError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::Unavailable(format!("{} body read failed: {}", provider, e)))?;

    if !status.is_success() {
        warn!(provider, status = status.as_u16(), "Provider returned error");
        return Err(classify_status(provider, status, &text));
    }

    serde_json::from_str(&text)
        .map_err(|e| ProviderError::Malformed(format!("{} response is not valid: {}", provider, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let s = |code| StatusCode::from_u16(code).unwrap();
        assert!(matches!(classify_status("p", s(429), ""), ProviderError::Rejected(_)));
        assert!(matches!(classify_status("p", s(400), ""), ProviderError::Rejected(_)));
        assert!(matches!(classify_status("p", s(422), ""), ProviderError::Rejected(_)));
        assert!(matches!(classify_status("p", s(401), ""), ProviderError::Unavailable(_)));
        assert!(matches!(classify_status("p", s(503), ""), ProviderError::Unavailable(_)));
        assert!(matches!(classify_status("p", s(408), ""), ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_factory_builds_each_kind() {
        for kind in [ProviderKind::Ollama, ProviderKind::OpenAi, ProviderKind::Gemini] {
            let settings = ProviderSettings {
                kind,
                base_url: None,
                api_key_env: None,
                api_version: None,
                model: "m".into(),
                temperature: None,
                max_tokens: None,
                timeout_secs: 5,
            };
            let provider = create_provider(&settings).unwrap();
            assert_eq!(provider.name(), kind.to_string());
        }
    }
}
