//! Reasoning-boundary client and strict response parsing.
//!
//! The boundary is a single request/response exchange: the compiled
//! instruction document goes out, a structured selection comes back. The
//! HTTP client carries a hard timeout and never retries — a timeout, a
//! non-success status, an empty body, an unparseable structured block, and
//! a zero-selection block are all the same recoverable failure from the
//! pipeline's point of view (`GenerateError::ReasoningBoundary`).
//!
//! Two implementations:
//! - **[`DisabledReasoningClient`]** — returns errors; used when the
//!   reasoning provider is not configured.
//! - **[`OpenAiReasoningClient`]** — calls an OpenAI-style chat-completions
//!   endpoint. Requires the `OPENAI_API_KEY` environment variable.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ReasoningConfig;
use crate::models::{Selection, SelectionResult};
use crate::traits::ReasoningClient;

// ============ Disabled client ============

/// A no-op reasoning client that always returns errors. Used when
/// `reasoning.provider = "disabled"` in the configuration.
pub struct DisabledReasoningClient;

#[async_trait]
impl ReasoningClient for DisabledReasoningClient {
    async fn complete(&self, _document: &str) -> Result<String> {
        bail!("Reasoning provider is disabled")
    }
}

// ============ OpenAI-style client ============

/// Reasoning client for an OpenAI-compatible chat-completions API.
pub struct OpenAiReasoningClient {
    client: reqwest::Client,
    model: String,
    api_base: String,
}

impl OpenAiReasoningClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("reasoning.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        // The timeout is the boundary's hard deadline; a timeout surfaces
        // as an ordinary boundary failure, never a retry.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            api_base: config.api_base.clone(),
        })
    }
}

#[async_trait]
impl ReasoningClient for OpenAiReasoningClient {
    async fn complete(&self, document: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": document }
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Reasoning API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid reasoning response: missing message content"))?;

        Ok(content.to_string())
    }
}

/// Create the appropriate [`ReasoningClient`] based on configuration.
pub fn create_client(config: &ReasoningConfig) -> Result<Box<dyn ReasoningClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledReasoningClient)),
        "openai" => Ok(Box::new(OpenAiReasoningClient::new(config)?)),
        other => bail!("Unknown reasoning provider: {}", other),
    }
}

// ============ Response parsing ============

#[derive(Debug, Deserialize)]
struct WireSelection {
    id: i64,
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct WireSelectionResult {
    selections: Vec<WireSelection>,
    analysis: String,
}

/// Parse the raw response text into a [`SelectionResult`].
///
/// The schema is strict: the first JSON object in the text must carry a
/// non-empty `selections` array (each entry with `id` and `rationale`) and
/// an `analysis` string. Any deviation is a parse failure — there is no
/// partial recovery, because a loosely-recovered selection is worse than a
/// clean error the caller can act on.
pub fn parse_selection(raw: &str) -> Result<SelectionResult> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("empty response body");
    }

    // Tolerate surrounding prose or a markdown fence around the object
    let start = trimmed
        .find('{')
        .ok_or_else(|| anyhow!("response contains no structured block"))?;
    let end = trimmed
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| anyhow!("response contains no structured block"))?;

    let wire: WireSelectionResult = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| anyhow!("malformed structured block: {}", e))?;

    if wire.selections.is_empty() {
        bail!("structured block names zero selections");
    }

    Ok(SelectionResult {
        selections: wire
            .selections
            .into_iter()
            .map(|s| Selection {
                question_id: s.id,
                rationale: s.rationale,
            })
            .collect(),
        analysis: wire.analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_object() {
        let raw = r#"{"selections":[{"id":12,"rationale":"covers weak topic"}],"analysis":"steady"}"#;
        let result = parse_selection(raw).unwrap();
        assert_eq!(result.selections.len(), 1);
        assert_eq!(result.selections[0].question_id, 12);
        assert_eq!(result.analysis, "steady");
    }

    #[test]
    fn test_parse_tolerates_fence_and_prose() {
        let raw = "Here is my selection:\n```json\n{\"selections\":[{\"id\":1,\"rationale\":\"r\"},{\"id\":2,\"rationale\":\"r2\"}],\"analysis\":\"a\"}\n```\nDone.";
        let result = parse_selection(raw).unwrap();
        let ids: Vec<i64> = result.selections.iter().map(|s| s.question_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_parse_preserves_selection_order() {
        let raw = r#"{"selections":[{"id":9,"rationale":"a"},{"id":3,"rationale":"b"},{"id":7,"rationale":"c"}],"analysis":"x"}"#;
        let result = parse_selection(raw).unwrap();
        let ids: Vec<i64> = result.selections.iter().map(|s| s.question_id).collect();
        assert_eq!(ids, vec![9, 3, 7]);
    }

    #[test]
    fn test_parse_empty_body_fails() {
        assert!(parse_selection("").is_err());
        assert!(parse_selection("   \n  ").is_err());
    }

    #[test]
    fn test_parse_no_structured_block_fails() {
        assert!(parse_selection("I could not pick any questions.").is_err());
    }

    #[test]
    fn test_parse_zero_selections_fails() {
        let raw = r#"{"selections":[],"analysis":"nothing fits"}"#;
        assert!(parse_selection(raw).is_err());
    }

    #[test]
    fn test_parse_missing_required_field_fails() {
        // No analysis field: strict schema, no partial recovery
        let raw = r#"{"selections":[{"id":1,"rationale":"r"}]}"#;
        assert!(parse_selection(raw).is_err());
    }

    #[test]
    fn test_parse_malformed_entry_fails() {
        let raw = r#"{"selections":[{"id":"not-a-number","rationale":"r"}],"analysis":"a"}"#;
        assert!(parse_selection(raw).is_err());
    }
}
