//! Turning a model response into events, and acting on what they request.

use std::sync::Arc;

use relayclaw_core::content::{FunctionCall, Part};
use relayclaw_core::error::{Error, Result};
use relayclaw_core::event::Event;
use relayclaw_core::model::ModelResponse;
use relayclaw_core::tool::ToolRegistry;
use tracing::{debug, info};

use crate::context::InvocationContext;
use crate::dispatch::{auth_request_event, new_function_call_id};
use crate::driver::{run_steps, EventSink, Flow};

pub(crate) async fn postprocess(
    flow: &Flow,
    ctx: &mut InvocationContext,
    sink: &mut EventSink,
    draft: &Event,
    mut response: ModelResponse,
    tools: &ToolRegistry,
) -> Result<()> {
    let agent = Arc::clone(ctx.agent());

    // ── Response processors ──
    let processors = flow
        .response_processors
        .iter()
        .chain(agent.response_processors().iter());
    for processor in processors {
        for event in processor.process(ctx, &mut response).await? {
            sink.emit(event).await?;
        }
        if ctx.end_invocation {
            debug!(processor = processor.name(), "Response processor ended the invocation");
            return Ok(());
        }
    }

    if is_empty(&response) {
        return Ok(());
    }

    // ── Finalize ──
    let event = finalize_event(draft, response, tools);
    let calls: Vec<FunctionCall> = if event.partial {
        Vec::new()
    } else {
        event.function_calls().into_iter().cloned().collect()
    };
    sink.emit(event).await?;
    if calls.is_empty() {
        return Ok(());
    }

    // ── Tool resolution ──
    let resolved = sink
        .guard(flow.dispatcher.resolve(ctx, &calls, tools))
        .await??;
    let Some(response_event) = resolved else {
        return Ok(());
    };

    if let Some(auth_event) = auth_request_event(ctx, &response_event) {
        sink.emit(auth_event).await?;
    }
    let transfer = response_event.actions.transfer_to_agent.clone();
    sink.emit(response_event).await?;

    // ── Agent transfer ──
    if let Some(target) = transfer {
        transfer_to_agent(flow, ctx, sink, &target).await?;
    }
    Ok(())
}

/// Nothing to yield: no content, no error and no end-of-turn metadata.
fn is_empty(response: &ModelResponse) -> bool {
    response.content.is_none()
        && response.error_code.is_none()
        && response.usage_metadata.is_none()
        && response.finish_reason.is_none()
        && !response.interrupted
        && !response.turn_complete
}

/// Merge `response` onto a copy of `draft` and return the event to yield.
///
/// Fields the response carries replace the draft's; absent ones keep the
/// draft's value. The draft itself is never written, so one chunk's fields
/// cannot leak into the next. Function calls get ids if the model left them
/// blank, and calls to long-running tools are recorded.
pub(crate) fn finalize_event(
    draft: &Event,
    response: ModelResponse,
    tools: &ToolRegistry,
) -> Event {
    let mut event = draft.clone();
    if let Some(content) = response.content {
        event.content = Some(content);
    }
    if let Some(usage) = response.usage_metadata {
        event.usage_metadata = Some(usage);
    }
    if let Some(reason) = response.finish_reason {
        event.finish_reason = Some(reason);
    }
    if let Some(code) = response.error_code {
        event.error_code = Some(code);
    }
    if let Some(message) = response.error_message {
        event.error_message = Some(message);
    }
    event.partial = response.partial;
    event.turn_complete = response.turn_complete;
    event.interrupted = response.interrupted;

    if let Some(content) = &mut event.content {
        for part in &mut content.parts {
            if let Part::FunctionCall(call) = part {
                if call.id.is_empty() {
                    call.id = new_function_call_id();
                }
            }
        }
    }
    event.long_running_tool_ids = event
        .function_calls()
        .into_iter()
        .filter(|call| tools.is_long_running(&call.name))
        .map(|call| call.id.clone())
        .collect();
    event
}

async fn transfer_to_agent(
    flow: &Flow,
    ctx: &InvocationContext,
    sink: &mut EventSink,
    target: &str,
) -> Result<()> {
    let agent = ctx.agents().find(target).ok_or_else(|| Error::AgentNotFound {
        name: target.to_string(),
    })?;

    let mut sub = ctx.derive_for(agent);
    info!(
        invocation_id = %ctx.invocation_id(),
        from = ctx.agent().name(),
        to = target,
        branch = sub.branch().unwrap_or_default(),
        "Transferring to agent"
    );
    run_steps(flow, &mut sub, sink).await
}
