//! Request and response processors.
//!
//! A request processor shapes the outbound [`ModelRequest`] for one cycle; a
//! response processor inspects a [`ModelResponse`] before it is finalized.
//! Either may yield events of its own and may set
//! `InvocationContext::end_invocation` to cut the cycle short.
//!
//! The built-in request processors run first, in this order:
//! [`BasicProcessor`], [`IdentityProcessor`], [`ContentsProcessor`],
//! [`AgentTransferProcessor`].

mod basic;
mod contents;
mod identity;
mod transfer;

use std::sync::Arc;

use async_trait::async_trait;
use relayclaw_core::error::Result;
use relayclaw_core::event::Event;
use relayclaw_core::model::{ModelRequest, ModelResponse};

use crate::context::InvocationContext;

pub use basic::BasicProcessor;
pub use contents::ContentsProcessor;
pub use identity::IdentityProcessor;
pub use transfer::AgentTransferProcessor;

#[async_trait]
pub trait RequestProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Mutate `request` and return any events to yield before the model call.
    async fn process(
        &self,
        ctx: &mut InvocationContext,
        request: &mut ModelRequest,
    ) -> Result<Vec<Event>>;
}

#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect or rewrite `response` and return any events to yield ahead of
    /// its finalized event.
    async fn process(
        &self,
        ctx: &mut InvocationContext,
        response: &mut ModelResponse,
    ) -> Result<Vec<Event>>;
}

/// The request processors every flow starts with.
pub fn default_request_processors() -> Vec<Arc<dyn RequestProcessor>> {
    vec![
        Arc::new(BasicProcessor),
        Arc::new(IdentityProcessor),
        Arc::new(ContentsProcessor),
        Arc::new(AgentTransferProcessor),
    ]
}
