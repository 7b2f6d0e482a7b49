//! Model invocation: one backend call per cycle, buffered or streamed,
//! normalized into a sequence of [`ModelResponse`]s.

use std::sync::Arc;

use relayclaw_core::content::{Content, Part, Role};
use relayclaw_core::error::{ModelError, Result};
use relayclaw_core::event::EventActions;
use relayclaw_core::model::{ModelRequest, ModelResponse};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::{CallbackContext, InvocationContext};
use crate::driver::EventSink;
use crate::interceptor::{run_after_model, run_before_model, AfterModelInterceptor};

enum Source {
    Single(Option<ModelResponse>),
    Stream(mpsc::Receiver<std::result::Result<ModelResponse, ModelError>>),
}

/// Accumulates partial chunks so the terminal streamed response carries the
/// whole answer: the concatenated text, then any other parts the chunks
/// held (function calls) in the order they arrived.
#[derive(Debug, Default)]
struct StreamAggregator {
    text: String,
    parts: Vec<Part>,
}

impl StreamAggregator {
    fn observe(&mut self, mut response: ModelResponse) -> ModelResponse {
        if response.partial {
            response.usage_metadata = None;
            if let Some(content) = &response.content {
                for part in &content.parts {
                    match part {
                        Part::Text { text } => self.text.push_str(text),
                        other => self.parts.push(other.clone()),
                    }
                }
            }
            return response;
        }

        let text = std::mem::take(&mut self.text);
        let parts = std::mem::take(&mut self.parts);
        if text.is_empty() && parts.is_empty() {
            return response;
        }
        if let Some(content) = response.content.as_mut() {
            if content.text().is_empty() && !text.is_empty() {
                content.parts.insert(0, Part::text(text));
            }
            if content.function_calls().next().is_none() {
                content.parts.extend(parts);
            }
        } else {
            let mut content = Content {
                role: Role::Model,
                parts: Vec::new(),
            };
            if !text.is_empty() {
                content.parts.push(Part::text(text));
            }
            content.parts.extend(parts);
            response.content = Some(content);
        }
        response
    }
}

/// An in-flight model call.
pub(crate) struct ModelCall {
    source: Source,
    after_model: Vec<Arc<dyn AfterModelInterceptor>>,
    callback: CallbackContext,
    aggregator: StreamAggregator,
}

impl ModelCall {
    /// Run the before-model chain and, unless it answered, call the backend.
    ///
    /// Backend failures become error responses. Only the call limit and
    /// cancellation fail here.
    pub(crate) async fn start(
        ctx: &InvocationContext,
        mut request: ModelRequest,
        sink: &EventSink,
    ) -> Result<Self> {
        let agent = ctx.agent();
        let mut callback = CallbackContext::new(ctx);

        let answered = run_before_model(agent.before_model(), &mut callback, &mut request).await;
        if let Some(response) = answered {
            debug!(agent = agent.name(), "Model call answered by before-model interceptor");
            return Ok(Self {
                source: Source::Single(Some(response)),
                after_model: Vec::new(),
                callback,
                aggregator: StreamAggregator::default(),
            });
        }

        let llm_calls = ctx.llm_calls().increment()?;
        callback.llm_call_count = llm_calls;
        debug!(
            agent = agent.name(),
            backend = agent.backend().name(),
            model = %request.model,
            llm_calls,
            streaming = ctx.is_streaming(),
            "Calling model"
        );

        let backend = Arc::clone(agent.backend());
        let source = if ctx.is_streaming() {
            match sink.guard(backend.generate_stream(request)).await? {
                Ok(rx) => Source::Stream(rx),
                Err(e) => {
                    warn!(agent = agent.name(), error = %e, "Model stream failed to open");
                    Source::Single(Some(ModelResponse::from_error(&e)))
                }
            }
        } else {
            let response = sink.guard(backend.generate(request)).await?.unwrap_or_else(|e| {
                warn!(agent = agent.name(), error = %e, "Model call failed");
                ModelResponse::from_error(&e)
            });
            Source::Single(Some(response))
        };

        Ok(Self {
            source,
            after_model: agent.after_model().to_vec(),
            callback,
            aggregator: StreamAggregator::default(),
        })
    }

    /// The next response of this call, after the after-model chain.
    pub(crate) async fn next(&mut self, sink: &EventSink) -> Result<Option<ModelResponse>> {
        let mut exhausted = false;
        let response = match &mut self.source {
            Source::Single(slot) => match slot.take() {
                Some(response) => response,
                None => return Ok(None),
            },
            Source::Stream(rx) => match sink.guard(rx.recv()).await? {
                None => return Ok(None),
                Some(Ok(chunk)) => self.aggregator.observe(chunk),
                Some(Err(e)) => {
                    warn!(error = %e, "Model stream broke off");
                    exhausted = true;
                    ModelResponse::from_error(&e)
                }
            },
        };
        if exhausted {
            self.source = Source::Single(None);
        }

        let response = run_after_model(&self.after_model, &mut self.callback, &response)
            .await
            .unwrap_or(response);
        Ok(Some(response))
    }

    /// Actions interceptors recorded since the last call.
    pub(crate) fn take_actions(&mut self) -> EventActions {
        std::mem::take(&mut self.callback.actions)
    }
}
