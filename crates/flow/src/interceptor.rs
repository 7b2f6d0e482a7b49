//! Interceptor chains around model and tool calls.
//!
//! Each phase is an ordered list of interceptors dispatched in registration
//! order. The first interceptor that returns `Some` wins and the rest of
//! that phase is skipped for the call. Interceptors reach shared state only
//! through the `actions` on their context.

use std::sync::Arc;

use async_trait::async_trait;
use relayclaw_core::model::{ModelRequest, ModelResponse};
use relayclaw_core::tool::{Tool, ToolContext};
use serde_json::Value;

use crate::context::CallbackContext;

/// Runs before the backend. Returning a response skips the backend call
/// entirely and that response is used verbatim.
#[async_trait]
pub trait BeforeModelInterceptor: Send + Sync {
    async fn before_model(
        &self,
        ctx: &mut CallbackContext,
        request: &mut ModelRequest,
    ) -> Option<ModelResponse>;
}

/// Runs after each backend response. Returning a response replaces it.
#[async_trait]
pub trait AfterModelInterceptor: Send + Sync {
    async fn after_model(
        &self,
        ctx: &mut CallbackContext,
        response: &ModelResponse,
    ) -> Option<ModelResponse>;
}

/// Runs before a tool executes. Returning a value skips execution and
/// becomes the tool's result.
#[async_trait]
pub trait BeforeToolInterceptor: Send + Sync {
    async fn before_tool(
        &self,
        tool: &dyn Tool,
        args: &mut Value,
        ctx: &mut ToolContext,
    ) -> Option<Value>;
}

/// Runs after a tool executes. Returning a value replaces its result.
#[async_trait]
pub trait AfterToolInterceptor: Send + Sync {
    async fn after_tool(
        &self,
        tool: &dyn Tool,
        args: &Value,
        ctx: &mut ToolContext,
        result: &Value,
    ) -> Option<Value>;
}

pub(crate) async fn run_before_model(
    chain: &[Arc<dyn BeforeModelInterceptor>],
    ctx: &mut CallbackContext,
    request: &mut ModelRequest,
) -> Option<ModelResponse> {
    for interceptor in chain {
        if let Some(response) = interceptor.before_model(ctx, request).await {
            return Some(response);
        }
    }
    None
}

pub(crate) async fn run_after_model(
    chain: &[Arc<dyn AfterModelInterceptor>],
    ctx: &mut CallbackContext,
    response: &ModelResponse,
) -> Option<ModelResponse> {
    for interceptor in chain {
        if let Some(replacement) = interceptor.after_model(ctx, response).await {
            return Some(replacement);
        }
    }
    None
}

pub(crate) async fn run_before_tool(
    chain: &[Arc<dyn BeforeToolInterceptor>],
    tool: &dyn Tool,
    args: &mut Value,
    ctx: &mut ToolContext,
) -> Option<Value> {
    for interceptor in chain {
        if let Some(result) = interceptor.before_tool(tool, args, ctx).await {
            return Some(result);
        }
    }
    None
}

pub(crate) async fn run_after_tool(
    chain: &[Arc<dyn AfterToolInterceptor>],
    tool: &dyn Tool,
    args: &Value,
    ctx: &mut ToolContext,
    result: &Value,
) -> Option<Value> {
    for interceptor in chain {
        if let Some(replacement) = interceptor.after_tool(tool, args, ctx, result).await {
            return Some(replacement);
        }
    }
    None
}
