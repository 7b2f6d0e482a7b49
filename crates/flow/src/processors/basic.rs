use async_trait::async_trait;
use relayclaw_core::error::Result;
use relayclaw_core::event::Event;
use relayclaw_core::model::ModelRequest;

use super::RequestProcessor;
use crate::context::InvocationContext;

/// Copies the agent's model name and generation settings onto the request.
pub struct BasicProcessor;

#[async_trait]
impl RequestProcessor for BasicProcessor {
    fn name(&self) -> &str {
        "basic"
    }

    async fn process(
        &self,
        ctx: &mut InvocationContext,
        request: &mut ModelRequest,
    ) -> Result<Vec<Event>> {
        let agent = ctx.agent();
        request.model = agent.model().to_string();
        request.config = agent.generate_config().clone();
        Ok(Vec::new())
    }
}
