//! Request assembly for one cycle.

use std::sync::Arc;

use relayclaw_core::error::Result;
use relayclaw_core::model::ModelRequest;
use relayclaw_core::tool::ToolRegistry;
use tracing::debug;

use crate::context::InvocationContext;
use crate::dispatch::TransferToAgentTool;
use crate::driver::{EventSink, Flow};

/// What the model call needs from preprocessing.
pub(crate) struct Prepared {
    pub request: ModelRequest,
    /// The tool set for this cycle: the agent's own tools plus any the flow
    /// adds (such as `transfer_to_agent`)
    pub tools: ToolRegistry,
}

/// Build the model request, forwarding processor events to `sink`.
///
/// Returns `None` when a processor ended the invocation, in which case the
/// model is not called this cycle.
pub(crate) async fn preprocess(
    flow: &Flow,
    ctx: &mut InvocationContext,
    sink: &mut EventSink,
) -> Result<Option<Prepared>> {
    let agent = Arc::clone(ctx.agent());
    let mut request = ModelRequest::default();

    // ── Request processors ──
    let processors = flow
        .request_processors
        .iter()
        .chain(agent.request_processors().iter());
    for processor in processors {
        for event in processor.process(ctx, &mut request).await? {
            sink.emit(event).await?;
        }
        if ctx.end_invocation {
            debug!(processor = processor.name(), "Request processor ended the invocation");
            return Ok(None);
        }
    }

    // ── Tools ──
    let mut tools = agent.tools().clone();
    if !ctx.agents().transfer_targets(&agent).is_empty() {
        tools.register(Arc::new(TransferToAgentTool));
    }
    request.append_tools(tools.declarations());

    // ── Instructions and labels ──
    request.append_instructions([
        ctx.agents().root().global_instruction(),
        agent.instruction(),
    ]);
    request.labels.extend(
        ctx.labels()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    request
        .labels
        .insert("agent_name".to_string(), agent.name().to_string());

    Ok(Some(Prepared { request, tools }))
}
