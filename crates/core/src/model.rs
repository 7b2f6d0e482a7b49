//! Model backend trait: the abstraction over language-model providers.
//!
//! A backend knows how to turn a [`ModelRequest`] into one response, or a
//! stream of responses. The flow engine calls it without knowing which
//! provider sits behind it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::content::Content;
use crate::error::ModelError;

/// Generation parameters forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// A tool declaration sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The outbound request, built fresh every cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o")
    #[serde(default)]
    pub model: String,

    /// Conversation turns, oldest first
    #[serde(default)]
    pub contents: Vec<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,

    #[serde(default)]
    pub config: GenerateConfig,

    /// Free-form labels; always carries the owning agent's name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ModelRequest {
    /// Append instructions to the system instruction, separated by a blank line.
    pub fn append_instructions<I, S>(&mut self, instructions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for instruction in instructions {
            let instruction = instruction.as_ref();
            if instruction.is_empty() {
                continue;
            }
            match &mut self.system_instruction {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(instruction);
                }
                None => self.system_instruction = Some(instruction.to_string()),
            }
        }
    }

    /// Add tool declarations, replacing any existing declaration with the same name.
    pub fn append_tools(&mut self, declarations: impl IntoIterator<Item = ToolDeclaration>) {
        for declaration in declarations {
            self.tools.retain(|t| t.name != declaration.name);
            self.tools.push(declaration);
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

/// One response (or stream chunk) from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// The model's output was cut off by the user or the backend
    #[serde(default)]
    pub interrupted: bool,

    /// A stream chunk holding only a delta
    #[serde(default)]
    pub partial: bool,

    #[serde(default)]
    pub turn_complete: bool,
}

impl ModelResponse {
    /// A complete, non-partial text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(Content::model(text)),
            finish_reason: Some(FinishReason::Stop),
            turn_complete: true,
            ..Default::default()
        }
    }

    /// A partial chunk holding a text delta.
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            content: Some(Content::model(text)),
            partial: true,
            ..Default::default()
        }
    }

    /// A backend failure expressed as data.
    pub fn from_error(error: &ModelError) -> Self {
        Self {
            error_code: Some(error.code().to_string()),
            error_message: Some(error.to_string()),
            turn_complete: true,
            ..Default::default()
        }
    }
}

/// The core model backend trait.
///
/// Every provider (OpenAI, Anthropic, a local model, a test script)
/// implements this trait. The flow calls `generate()` in buffered mode and
/// `generate_stream()` in streamed mode.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Send a request and get a stream of responses.
    ///
    /// Implementations yield `partial` chunks holding deltas and must finish
    /// with exactly one non-partial response. The default implementation
    /// calls `generate()` and forwards its result as the only element.
    async fn generate_stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<Result<ModelResponse, ModelError>>, ModelError> {
        let response = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(response)).await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_instructions_joins_with_blank_line() {
        let mut request = ModelRequest::default();
        request.append_instructions(["Be brief.", "", "Answer in English."]);
        assert_eq!(
            request.system_instruction.as_deref(),
            Some("Be brief.\n\nAnswer in English.")
        );
    }

    #[test]
    fn append_tools_replaces_same_name() {
        let mut request = ModelRequest::default();
        let decl = |desc: &str| ToolDeclaration {
            name: "shell".into(),
            description: desc.into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        request.append_tools([decl("old")]);
        request.append_tools([decl("new")]);
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].description, "new");
    }

    #[test]
    fn error_response_carries_code() {
        let response = ModelResponse::from_error(&ModelError::RateLimited {
            retry_after_secs: 10,
        });
        assert_eq!(response.error_code.as_deref(), Some("RATE_LIMITED"));
        assert!(response.content.is_none());
        assert!(!response.partial);
    }

    struct Fixed;

    #[async_trait]
    impl ModelBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse::text("done"))
        }
    }

    #[tokio::test]
    async fn default_stream_yields_single_final_response() {
        let mut rx = Fixed.generate_stream(ModelRequest::default()).await.unwrap();
        let only = rx.recv().await.unwrap().unwrap();
        assert!(!only.partial);
        assert_eq!(only.content.unwrap().text(), "done");
        assert!(rx.recv().await.is_none());
    }
}
