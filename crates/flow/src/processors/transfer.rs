use async_trait::async_trait;
use relayclaw_core::error::Result;
use relayclaw_core::event::Event;
use relayclaw_core::model::ModelRequest;

use super::RequestProcessor;
use crate::context::InvocationContext;
use crate::dispatch::TRANSFER_TO_AGENT;

/// Describes the agents the current agent may hand off to.
///
/// The matching `transfer_to_agent` tool is added by preprocessing whenever
/// the target list is non-empty.
pub struct AgentTransferProcessor;

#[async_trait]
impl RequestProcessor for AgentTransferProcessor {
    fn name(&self) -> &str {
        "agent_transfer"
    }

    async fn process(
        &self,
        ctx: &mut InvocationContext,
        request: &mut ModelRequest,
    ) -> Result<Vec<Event>> {
        let agent = ctx.agent();
        let targets = ctx.agents().transfer_targets(agent);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut instruction = String::from("You have a list of other agents to transfer to:\n");
        for target in &targets {
            instruction.push_str(&format!(
                "\nAgent name: {}\nAgent description: {}\n",
                target.name(),
                target.description()
            ));
        }
        instruction.push_str(&format!(
            "\nIf you are the best to answer the question according to your \
             description, you can answer it.\n\nIf another agent is better for \
             answering the question according to its description, call \
             `{TRANSFER_TO_AGENT}` function to transfer the question to that \
             agent. When transferring, do not generate any text other than the \
             function call.\n"
        ));

        if let Some(parent) = ctx.agents().parent_of(agent.name()) {
            if targets.iter().any(|t| t.name() == parent.name()) {
                instruction.push_str(&format!(
                    "\nYour parent agent is {}. If neither the other agents nor \
                     you are best for answering the question according to the \
                     descriptions, transfer to your parent agent.\n",
                    parent.name()
                ));
            }
        }

        request.append_instructions([instruction]);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::LlmAgent;
    use crate::test_helpers::ScriptedBackend;

    fn root() -> Arc<LlmAgent> {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        Arc::new(
            LlmAgent::new("root", backend.clone())
                .with_sub_agent(
                    LlmAgent::new("billing", backend.clone()).with_description("Invoices"),
                )
                .with_sub_agent(
                    LlmAgent::new("sales", backend)
                        .disallow_transfer_to_parent(true)
                        .disallow_transfer_to_peers(true),
                ),
        )
    }

    #[tokio::test]
    async fn lists_targets_and_parent_note() {
        let root_ctx = InvocationContext::new(root()).unwrap();
        let billing = root_ctx.agents().find("billing").unwrap();
        let mut ctx = root_ctx.derive_for(billing);
        let mut request = ModelRequest::default();

        AgentTransferProcessor
            .process(&mut ctx, &mut request)
            .await
            .unwrap();
        let instruction = request.system_instruction.unwrap();
        assert!(instruction.contains("Agent name: root"));
        assert!(instruction.contains("Agent name: sales"));
        assert!(instruction.contains("Your parent agent is root"));
    }

    #[tokio::test]
    async fn no_targets_adds_nothing() {
        let root_ctx = InvocationContext::new(root()).unwrap();
        let sales = root_ctx.agents().find("sales").unwrap();
        let mut ctx = root_ctx.derive_for(sales);
        let mut request = ModelRequest::default();

        AgentTransferProcessor
            .process(&mut ctx, &mut request)
            .await
            .unwrap();
        assert!(request.system_instruction.is_none());
    }
}
