//! Events: the only thing the flow engine ever emits.
//!
//! An event is immutable once yielded. The engine may re-stamp `id` on the
//! draft it reuses for several chunks of one streamed response, but
//! `author`, `invocation_id` and `branch` are fixed at creation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{Content, FunctionCall, FunctionResponse};
use crate::model::{FinishReason, UsageMetadata};

/// Side-channel directives attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    /// Hand control to the named agent within the same invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,

    /// Do not send the tool result back to the model; the turn ends here
    #[serde(default)]
    pub skip_summarization: bool,

    /// Ask the parent agent to take over
    #[serde(default)]
    pub escalate: bool,

    /// Session state updates produced during this step
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub state_delta: serde_json::Map<String, serde_json::Value>,

    /// Function-call id → auth config for tools that need user authorization
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requested_auth_configs: BTreeMap<String, serde_json::Value>,
}

impl EventActions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold `other` into `self`; values set in `other` win.
    pub fn merge(&mut self, other: EventActions) {
        if other.transfer_to_agent.is_some() {
            self.transfer_to_agent = other.transfer_to_agent;
        }
        self.skip_summarization |= other.skip_summarization;
        self.escalate |= other.escalate;
        self.state_delta.extend(other.state_delta);
        self.requested_auth_configs
            .extend(other.requested_auth_configs);
    }
}

/// A single record in an invocation's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// Agent name, or "user" for user input
    pub author: String,
    /// Delegation lineage, e.g. `root.billing`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(default)]
    pub partial: bool,

    #[serde(default)]
    pub turn_complete: bool,

    #[serde(default)]
    pub interrupted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    #[serde(default)]
    pub actions: EventActions,

    /// Ids of function calls whose results arrive out of band
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_tool_ids: Vec<String>,
}

impl Event {
    /// Create an empty event authored by `author`.
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: Self::new_id(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            branch: None,
            timestamp: Utc::now(),
            content: None,
            partial: false,
            turn_complete: false,
            interrupted: false,
            error_code: None,
            error_message: None,
            usage_metadata: None,
            finish_reason: None,
            actions: EventActions::default(),
            long_running_tool_ids: Vec::new(),
        }
    }

    /// A user turn holding a single text part.
    pub fn user_message(invocation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(invocation_id, "user").with_content(Content::user(text))
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }

    /// Concatenated text of the event's content, empty when there is none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .as_ref()
            .map(|c| c.function_calls().collect())
            .unwrap_or_default()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.content
            .as_ref()
            .map(|c| c.function_responses().collect())
            .unwrap_or_default()
    }

    /// Whether this event ends the agent's turn.
    ///
    /// An event requesting skipped summarization or carrying long-running
    /// calls is final. Otherwise it is final only when it is complete and
    /// neither requests nor answers a function call.
    pub fn is_final_response(&self) -> bool {
        if self.actions.skip_summarization || !self.long_running_tool_ids.is_empty() {
            return true;
        }
        !self.partial && self.function_calls().is_empty() && self.function_responses().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Part, Role};

    fn call_event() -> Event {
        Event::new("inv-1", "root").with_content(Content {
            role: Role::Model,
            parts: vec![Part::FunctionCall(FunctionCall {
                id: "c1".into(),
                name: "lookup".into(),
                args: serde_json::json!({}),
            })],
        })
    }

    #[test]
    fn plain_text_event_is_final() {
        let event = Event::new("inv-1", "root").with_content(Content::model("done"));
        assert!(event.is_final_response());
    }

    #[test]
    fn partial_and_function_call_events_are_not_final() {
        let mut partial = Event::new("inv-1", "root").with_content(Content::model("He"));
        partial.partial = true;
        assert!(!partial.is_final_response());
        assert!(!call_event().is_final_response());
    }

    #[test]
    fn long_running_call_is_final() {
        let mut event = call_event();
        event.long_running_tool_ids.push("c1".into());
        assert!(event.is_final_response());
    }

    #[test]
    fn merge_keeps_latest_transfer_and_unions_flags() {
        let mut actions = EventActions {
            transfer_to_agent: Some("a".into()),
            ..Default::default()
        };
        let mut other = EventActions {
            transfer_to_agent: Some("b".into()),
            skip_summarization: true,
            ..Default::default()
        };
        other.state_delta.insert("k".into(), serde_json::json!(1));
        actions.merge(other);
        assert_eq!(actions.transfer_to_agent.as_deref(), Some("b"));
        assert!(actions.skip_summarization);
        assert_eq!(actions.state_delta["k"], 1);

        actions.merge(EventActions::default());
        assert_eq!(actions.transfer_to_agent.as_deref(), Some("b"));
    }

    #[test]
    fn event_serialization_skips_empty_fields() {
        let event = Event::user_message("inv-1", "hi");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""author":"user""#));
        assert!(!json.contains("long_running_tool_ids"));
        assert!(!json.contains("error_code"));
    }
}
