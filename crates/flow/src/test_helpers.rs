//! Shared test helpers for flow tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use relayclaw_core::content::{Content, FunctionCall, Part, Role};
use relayclaw_core::error::{Error, ModelError, ToolError};
use relayclaw_core::event::Event;
use relayclaw_core::model::{ModelBackend, ModelRequest, ModelResponse};
use relayclaw_core::tool::{Tool, ToolContext};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::context::InvocationContext;
use crate::dispatch::TRANSFER_TO_AGENT;
use crate::driver::{EventSink, EventStream};

/// What one scripted backend call produces.
pub enum Script {
    Buffered(ModelResponse),
    Stream(Vec<Result<ModelResponse, ModelError>>),
    Fail(ModelError),
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self::Buffered(ModelResponse::text(text))
    }
}

/// A mock backend that plays back a sequence of scripted calls.
///
/// Each call to `generate` or `generate_stream` consumes the next script
/// and records the request. Panics if more calls are made than scripts
/// provided.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self, request: ModelRequest) -> Script {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            panic!(
                "ScriptedBackend: no more scripts (call #{})",
                requests.len()
            )
        })
    }
}

#[async_trait::async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        match self.next_script(request) {
            Script::Buffered(response) => Ok(response),
            Script::Fail(error) => Err(error),
            Script::Stream(items) => items
                .into_iter()
                .last()
                .unwrap_or_else(|| Ok(ModelResponse::default())),
        }
    }

    async fn generate_stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<Result<ModelResponse, ModelError>>, ModelError> {
        let items = match self.next_script(request) {
            Script::Buffered(response) => vec![Ok(response)],
            Script::Stream(items) => items,
            Script::Fail(error) => return Err(error),
        };
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        Ok(rx)
    }
}

/// A buffered response asking for one call to `name`. The call id is left
/// blank for the flow to fill in.
pub fn call(name: &str, args: Value) -> ModelResponse {
    ModelResponse {
        content: Some(Content {
            role: Role::Model,
            parts: vec![Part::FunctionCall(FunctionCall {
                id: String::new(),
                name: name.into(),
                args,
            })],
        }),
        turn_complete: true,
        ..Default::default()
    }
}

pub fn transfer_call(agent_name: &str) -> ModelResponse {
    call(TRANSFER_TO_AGENT, json!({ "agent_name": agent_name }))
}

/// Drain a stream into its events and the fatal error that ended it, if any.
pub async fn collect(mut stream: EventStream) -> (Vec<Event>, Option<Error>) {
    use futures::StreamExt;

    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(error) => return (events, Some(error)),
        }
    }
    (events, None)
}

/// A sink writing into `ctx`'s transcript, plus the receiving end.
pub(crate) fn sink_for(
    ctx: &InvocationContext,
) -> (EventSink, mpsc::Receiver<relayclaw_core::Result<Event>>) {
    let (tx, rx) = mpsc::channel(16);
    (EventSink::new(tx, ctx.transcript()), rx)
}

/// Echoes its `text` argument back.
pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &mut ToolContext) -> Result<Value, ToolError> {
        Ok(arguments["text"].clone())
    }
}

/// A long-running tool whose result arrives later; returns nothing now.
pub struct PendingTool;

#[async_trait::async_trait]
impl Tool for PendingTool {
    fn name(&self) -> &str {
        "approval"
    }

    fn description(&self) -> &str {
        "Asks a human to approve"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn is_long_running(&self) -> bool {
        true
    }

    async fn execute(&self, _arguments: Value, _ctx: &mut ToolContext) -> Result<Value, ToolError> {
        Ok(Value::Null)
    }
}
