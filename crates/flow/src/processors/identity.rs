use async_trait::async_trait;
use relayclaw_core::error::Result;
use relayclaw_core::event::Event;
use relayclaw_core::model::ModelRequest;

use super::RequestProcessor;
use crate::context::InvocationContext;

/// Tells the model which agent it is speaking as.
pub struct IdentityProcessor;

#[async_trait]
impl RequestProcessor for IdentityProcessor {
    fn name(&self) -> &str {
        "identity"
    }

    async fn process(
        &self,
        ctx: &mut InvocationContext,
        request: &mut ModelRequest,
    ) -> Result<Vec<Event>> {
        let agent = ctx.agent();
        let mut lines = vec![format!(
            "You are an agent. Your internal name is \"{}\".",
            agent.name()
        )];
        if !agent.description().is_empty() {
            lines.push(format!(
                "The description about you is \"{}\"",
                agent.description()
            ));
        }
        request.append_instructions([lines.join(" ")]);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::LlmAgent;
    use crate::test_helpers::ScriptedBackend;

    #[tokio::test]
    async fn names_agent_and_description() {
        let agent = LlmAgent::new("billing", Arc::new(ScriptedBackend::new(vec![])))
            .with_description("Handles invoices");
        let mut ctx = InvocationContext::new(Arc::new(agent)).unwrap();
        let mut request = ModelRequest::default();

        IdentityProcessor.process(&mut ctx, &mut request).await.unwrap();
        let instruction = request.system_instruction.unwrap();
        assert!(instruction.contains(r#"Your internal name is "billing""#));
        assert!(instruction.contains("Handles invoices"));
    }
}
