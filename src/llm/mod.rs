//! LLM module - Language Model integrations
//!
//! Provides the provider trait, the HTTP adapters and the gateway that
//! agents call through.

pub mod gateway;
pub mod ollama;
pub mod provider;
pub mod traits;

pub use gateway::{ProviderGateway, RetryPolicy};
pub use ollama::OllamaClient;
pub use provider::create_provider;
pub use traits::{GenerateOptions, LLMProvider, LLMResponse, ProviderConfig, TokenUsage};
