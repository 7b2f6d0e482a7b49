use async_trait::async_trait;
use relayclaw_core::content::{Content, Part, Role};
use relayclaw_core::error::Result;
use relayclaw_core::event::Event;
use relayclaw_core::model::ModelRequest;

use super::RequestProcessor;
use crate::context::InvocationContext;
use crate::dispatch::REQUEST_CREDENTIAL;

/// Builds `contents` from the invocation transcript.
///
/// Only events on the current branch or one of its ancestors are visible.
/// Turns authored by other agents are rewritten as user-role context so the
/// model does not mistake them for its own output.
pub struct ContentsProcessor;

#[async_trait]
impl RequestProcessor for ContentsProcessor {
    fn name(&self) -> &str {
        "contents"
    }

    async fn process(
        &self,
        ctx: &mut InvocationContext,
        request: &mut ModelRequest,
    ) -> Result<Vec<Event>> {
        let agent_name = ctx.agent().name();
        let branch = ctx.branch();

        for event in ctx.transcript().snapshot() {
            if event.partial || !is_visible(branch, event.branch.as_deref()) {
                continue;
            }
            let Some(content) = event.content.as_ref().and_then(strip_credential_requests) else {
                continue;
            };
            if event.author == agent_name || event.author == "user" {
                request.contents.push(content);
            } else {
                request.contents.push(as_foreign_context(&event.author, &content));
            }
        }
        Ok(Vec::new())
    }
}

/// An event is visible on `current` if it was produced on that branch or on
/// one of its ancestors.
fn is_visible(current: Option<&str>, event_branch: Option<&str>) -> bool {
    match (current, event_branch) {
        (Some(current), Some(event_branch)) => {
            current == event_branch
                || current
                    .strip_prefix(event_branch)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
        _ => true,
    }
}

fn strip_credential_requests(content: &Content) -> Option<Content> {
    let parts: Vec<Part> = content
        .parts
        .iter()
        .filter(|part| match part {
            Part::FunctionCall(call) => call.name != REQUEST_CREDENTIAL,
            Part::FunctionResponse(response) => response.name != REQUEST_CREDENTIAL,
            Part::Text { .. } => true,
        })
        .cloned()
        .collect();

    let content = Content {
        role: content.role,
        parts,
    };
    (!content.parts.is_empty() && !content.is_empty()).then_some(content)
}

fn as_foreign_context(author: &str, content: &Content) -> Content {
    let mut parts = vec![Part::text("For context:")];
    for part in &content.parts {
        let line = match part {
            Part::Text { text } if text.is_empty() => continue,
            Part::Text { text } => format!("[{author}] said: {text}"),
            Part::FunctionCall(call) => format!(
                "[{author}] called tool `{}` with parameters: {}",
                call.name, call.args
            ),
            Part::FunctionResponse(response) => format!(
                "[{author}] `{}` tool returned result: {}",
                response.name, response.result
            ),
        };
        parts.push(Part::text(line));
    }
    Content {
        role: Role::User,
        parts,
    }
}
