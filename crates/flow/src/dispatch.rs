//! Tool resolution: turning a model's function calls into one
//! function-response event.
//!
//! The flow only decides *that* calls need resolving; how they run is up to
//! the [`ToolDispatcher`]. [`DefaultToolDispatcher`] runs each call through
//! the agent's tool interceptors and folds tool failures into error results
//! the model can read.

use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use relayclaw_core::content::{Content, FunctionCall, FunctionResponse, Part, Role};
use relayclaw_core::error::{Result, ToolError};
use relayclaw_core::event::{Event, EventActions};
use relayclaw_core::tool::{Tool, ToolContext, ToolRegistry};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::InvocationContext;
use crate::interceptor::{run_after_tool, run_before_tool};

/// Name of the built-in tool that hands control to another agent.
pub const TRANSFER_TO_AGENT: &str = "transfer_to_agent";

/// Name of the synthetic function call asking the user for credentials.
pub const REQUEST_CREDENTIAL: &str = "request_credential";

/// Generate an id for a function call the model left unnamed.
pub(crate) fn new_function_call_id() -> String {
    format!("call-{}", Uuid::new_v4())
}

/// Resolves the function calls of one finalized event.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Return the function-response event for `calls`, with one response
    /// part per call in call order, or `None` when nothing answers yet
    /// (every call is long-running).
    async fn resolve(
        &self,
        ctx: &InvocationContext,
        calls: &[FunctionCall],
        tools: &ToolRegistry,
    ) -> Result<Option<Event>>;
}

/// Looks tools up in the registry and executes them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultToolDispatcher;

impl DefaultToolDispatcher {
    async fn call_one(
        &self,
        ctx: &InvocationContext,
        call: &FunctionCall,
        tools: &ToolRegistry,
    ) -> (Option<FunctionResponse>, EventActions) {
        let mut tool_ctx = ToolContext::new(ctx.invocation_id(), ctx.agent().name(), &call.id);

        let Some(tool) = tools.get(&call.name) else {
            warn!(tool = %call.name, "Model called an unknown tool");
            let error = ToolError::NotFound(call.name.clone());
            return (Some(error_response(call, &error)), tool_ctx.actions);
        };

        let agent = ctx.agent();
        let mut args = call.args.clone();
        let start = Instant::now();

        let intercepted =
            run_before_tool(agent.before_tool(), tool.as_ref(), &mut args, &mut tool_ctx).await;
        let result = match intercepted {
            Some(result) => result,
            None => match tool.execute(args.clone(), &mut tool_ctx).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    json!({ "error": e.to_string() })
                }
            },
        };

        let result =
            run_after_tool(agent.after_tool(), tool.as_ref(), &args, &mut tool_ctx, &result)
                .await
                .unwrap_or(result);

        debug!(
            tool = %call.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool call resolved"
        );

        // Long-running tools answer out of band when they have nothing yet
        if tool.is_long_running() && result.is_null() {
            return (None, tool_ctx.actions);
        }

        let response = FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            result,
        };
        (Some(response), tool_ctx.actions)
    }
}

#[async_trait]
impl ToolDispatcher for DefaultToolDispatcher {
    async fn resolve(
        &self,
        ctx: &InvocationContext,
        calls: &[FunctionCall],
        tools: &ToolRegistry,
    ) -> Result<Option<Event>> {
        debug!(tool_count = calls.len(), "Executing tool calls");

        let outcomes = if ctx.run_config().parallel_tool_calls {
            join_all(calls.iter().map(|call| self.call_one(ctx, call, tools))).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(self.call_one(ctx, call, tools).await);
            }
            outcomes
        };

        let mut parts = Vec::with_capacity(outcomes.len());
        let mut actions = EventActions::default();
        for (response, call_actions) in outcomes {
            parts.extend(response.map(Part::FunctionResponse));
            actions.merge(call_actions);
        }

        if parts.is_empty() && actions.is_empty() {
            return Ok(None);
        }

        let event = Event::new(ctx.invocation_id(), ctx.agent().name())
            .with_branch(ctx.branch().map(String::from))
            .with_content(Content {
                role: Role::User,
                parts,
            })
            .with_actions(actions);
        Ok(Some(event))
    }
}

fn error_response(call: &FunctionCall, error: &ToolError) -> FunctionResponse {
    FunctionResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        result: json!({ "error": error.to_string() }),
    }
}

/// Build the event asking the user to authorize the calls in
/// `response.actions.requested_auth_configs`, if there are any.
pub fn auth_request_event(ctx: &InvocationContext, response: &Event) -> Option<Event> {
    let requested = &response.actions.requested_auth_configs;
    if requested.is_empty() {
        return None;
    }

    let calls: Vec<FunctionCall> = requested
        .iter()
        .map(|(call_id, auth_config)| FunctionCall {
            id: new_function_call_id(),
            name: REQUEST_CREDENTIAL.to_string(),
            args: json!({
                "function_call_id": call_id,
                "auth_config": auth_config,
            }),
        })
        .collect();

    let mut event = Event::new(ctx.invocation_id(), ctx.agent().name())
        .with_branch(ctx.branch().map(String::from))
        .with_content(Content {
            role: Role::Model,
            parts: calls.iter().cloned().map(Part::FunctionCall).collect(),
        });
    event.long_running_tool_ids = calls.into_iter().map(|c| c.id).collect();
    Some(event)
}

/// Hands control to another agent in the same invocation.
///
/// Offered to the model only when the current agent has transfer targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferToAgentTool;

#[async_trait]
impl Tool for TransferToAgentTool {
    fn name(&self) -> &str {
        TRANSFER_TO_AGENT
    }

    fn description(&self) -> &str {
        "Transfer the question to another agent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to transfer to"
                }
            },
            "required": ["agent_name"]
        })
    }

    async fn execute(
        &self,
        arguments: Value,
        ctx: &mut ToolContext,
    ) -> std::result::Result<Value, ToolError> {
        let agent_name = arguments["agent_name"]
            .as_str()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ToolError::InvalidArguments("'agent_name' must be a non-empty string".into())
            })?;

        ctx.actions.transfer_to_agent = Some(agent_name.to_string());
        Ok(json!({ "status": "transferred", "agent_name": agent_name }))
    }
}
