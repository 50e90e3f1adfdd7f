//! Plugin client
//!
//! Resolves a tool call against the capability table, runs one
//! request/response exchange with the plugin under a timeout, and turns the
//! outcome into a [`ToolResult`]. Timeouts and connection failures get a
//! single retry; contract violations and plugin errors do not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::core::{PluginError, Result, ToolCall, ToolResult};
use crate::plugins::protocol::{PluginRequest, PluginResponse};
use crate::plugins::registry::{Capability, CapabilityRegistry};
use crate::plugins::schema;

/// Attempts per invocation for transient failures
const MAX_ATTEMPTS: u32 = 2;

/// One request/response exchange with a plugin endpoint
///
/// Implementations report connection problems as `Unreachable` and
/// unparseable replies as `Malformed`; the client enforces the timeout.
#[async_trait]
pub trait PluginTransport: Send + Sync {
    async fn exchange(
        &self,
        endpoint: &str,
        request: &PluginRequest,
    ) -> std::result::Result<PluginResponse, PluginError>;
}

/// JSON-over-HTTP transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }
}

#[async_trait]
impl PluginTransport for HttpTransport {
    async fn exchange(
        &self,
        endpoint: &str,
        request: &PluginRequest,
    ) -> std::result::Result<PluginResponse, PluginError> {
        let capability = request.capability.clone();

        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| PluginError::Unreachable {
                capability: capability.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PluginError::Unreachable {
            capability: capability.clone(),
            message: format!("failed to read response body: {}", e),
        })?;

        match serde_json::from_str::<PluginResponse>(&body) {
            Ok(parsed) if status.is_success() || parsed.error.is_some() => Ok(parsed),
            _ if matches!(
                status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ) =>
            {
                Err(PluginError::Unreachable {
                    capability,
                    message: format!("endpoint returned {}", status),
                })
            }
            Ok(_) => Err(PluginError::Malformed {
                capability,
                message: format!("status {} without an error object", status),
            }),
            Err(e) => Err(PluginError::Malformed {
                capability,
                message: format!("status {}, unparseable body: {}", status, e),
            }),
        }
    }
}

/// Uniform call interface over the capability table
#[derive(Clone)]
pub struct PluginClient {
    registry: Arc<CapabilityRegistry>,
    transport: Arc<dyn PluginTransport>,
}

impl PluginClient {
    pub fn new(registry: Arc<CapabilityRegistry>, transport: Arc<dyn PluginTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Client over the HTTP transport
    pub fn http(registry: Arc<CapabilityRegistry>) -> Result<Self> {
        Ok(Self::new(registry, Arc::new(HttpTransport::new()?)))
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Invoke and fold any failure into a failed [`ToolResult`]
    pub async fn invoke(&self, call: &ToolCall, permitted: &[String], timeout: Duration) -> ToolResult {
        match self.try_invoke(call, permitted, timeout).await {
            Ok(payload) => ToolResult::success(call, payload),
            Err(err) => {
                warn!(
                    capability = %call.name,
                    correlation_id = %call.id,
                    code = %err.code(),
                    error = %err,
                    "Plugin invocation failed"
                );
                ToolResult::failure(call, err.code(), err.to_string())
            }
        }
    }

    /// Invoke and return the typed error
    pub async fn try_invoke(
        &self,
        call: &ToolCall,
        permitted: &[String],
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, PluginError> {
        let capability = self.registry.resolve(&call.name, permitted)?;

        let mut attempt = 1;
        loop {
            match self.exchange_once(capability, &call.arguments, timeout).await {
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    debug!(
                        capability = %call.name,
                        correlation_id = %call.id,
                        attempt,
                        error = %err,
                        "Retrying plugin call"
                    );
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn exchange_once(
        &self,
        capability: &Capability,
        arguments: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, PluginError> {
        let request = PluginRequest::new(&capability.name, arguments.clone());
        debug!(capability = %capability.name, request_id = %request.id, "Sending plugin request");

        let response = tokio::time::timeout(timeout, self.transport.exchange(&capability.endpoint, &request))
            .await
            .map_err(|_| PluginError::Timeout {
                capability: capability.name.clone(),
                timeout,
            })??;

        let malformed = |message: String| PluginError::Malformed {
            capability: capability.name.clone(),
            message,
        };

        if response.id != request.id {
            return Err(malformed(format!(
                "response id '{}' does not match request id '{}'",
                response.id, request.id
            )));
        }

        if let Some(error) = response.error {
            return Err(PluginError::Remote {
                capability: capability.name.clone(),
                code: error.code,
                message: error.message,
            });
        }

        let result = response
            .result
            .ok_or_else(|| malformed("response has neither result nor error".to_string()))?;

        if let Some(result_schema) = &capability.result_schema {
            schema::validate(&result, result_schema).map_err(malformed)?;
        }

        Ok(result)
    }
}
