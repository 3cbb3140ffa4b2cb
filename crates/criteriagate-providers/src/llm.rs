// crates/criteriagate-providers/src/llm.rs
// ============================================================================
// Module: CriteriaGate LLM Adapter
// Description: StructuredLlm implementation over an HTTP chat-completion
//              endpoint, validating responses against a caller-supplied
//              JSON Schema before returning.
// Purpose: Give the extract/ground/structure/ordinal-resolve nodes one
//          schema-enforced calling convention regardless of model backend.
// Dependencies: criteriagate_core, jsonschema, reqwest
// ============================================================================

//! ## Overview
//! The adapter is deliberately thin: it posts messages plus the target
//! schema to a configured endpoint, and validates the response before
//! returning it as JSON. Retry, timeout, and circuit-breaking are layered
//! on by `criteriagate-resilience`, not duplicated here.

use std::time::Duration;

use async_trait::async_trait;
use criteriagate_core::ClassifiedError;
use criteriagate_core::LlmMessage;
use criteriagate_core::PermanentError;
use criteriagate_core::StructuredLlm;
use criteriagate_core::TransientError;
use serde::Serialize;

/// Configuration for a single structured-LLM endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Model identifier sent with every request (e.g. `"medgemma_decide"`).
    pub model: String,
    /// Endpoint URL.
    pub endpoint: String,
    /// Request timeout.
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [LlmMessage],
    response_schema: &'a serde_json::Value,
}

/// HTTP-backed [`StructuredLlm`] implementation.
pub struct HttpStructuredLlm {
    config: LlmClientConfig,
    client: reqwest::Client,
}

impl HttpStructuredLlm {
    /// Builds a client for the given endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Permanent`] if the HTTP client cannot be built.
    pub fn new(config: LlmClientConfig) -> Result<Self, ClassifiedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ClassifiedError::Permanent(PermanentError::new(err.to_string())))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl StructuredLlm for HttpStructuredLlm {
    async fn call(
        &self,
        schema: &serde_json::Value,
        messages: &[LlmMessage],
    ) -> Result<serde_json::Value, ClassifiedError> {
        let request = CompletionRequest { model: &self.config.model, messages, response_schema: schema };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| ClassifiedError::Transient(TransientError::new(err.to_string())))?;

        if response.status().is_server_error() {
            return Err(ClassifiedError::Transient(TransientError::new(format!(
                "llm endpoint returned server error {}",
                response.status()
            ))));
        }
        if !response.status().is_success() {
            return Err(ClassifiedError::Permanent(PermanentError::new(format!(
                "llm endpoint rejected request with status {}",
                response.status()
            ))));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ClassifiedError::Transient(TransientError::new(err.to_string())))?;

        validate_against_schema(schema, &body)?;
        Ok(body)
    }
}

/// Validates `body` against `schema`, surfacing violations as permanent
/// (never retryable) errors.
fn validate_against_schema(schema: &serde_json::Value, body: &serde_json::Value) -> Result<(), ClassifiedError> {
    let compiled = jsonschema::validator_for(schema)
        .map_err(|err| ClassifiedError::Permanent(PermanentError::new(format!("invalid schema: {err}"))))?;
    if let Err(error) = compiled.validate(body) {
        return Err(ClassifiedError::Permanent(PermanentError::new(format!(
            "llm response failed schema validation: {error}"
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::validate_against_schema;

    #[test]
    fn accepts_conforming_body() {
        let schema = json!({"type": "object", "required": ["confidence"], "properties": {"confidence": {"type": "number"}}});
        let body = json!({"confidence": 0.9});
        assert!(validate_against_schema(&schema, &body).is_ok());
    }

    #[test]
    fn rejects_body_missing_required_field() {
        let schema = json!({"type": "object", "required": ["confidence"], "properties": {"confidence": {"type": "number"}}});
        let body = json!({});
        assert!(validate_against_schema(&schema, &body).is_err());
    }
}
