//! The step driver: runs cycles for one agent until a final event, and
//! exposes the whole invocation as a stream of events.
//!
//! `Flow::run` spawns the driver as one task feeding a bounded channel.
//! Delegated sub-runs write into the same channel, so the consumer sees a
//! single ordered stream. Dropping the stream cancels the task at its next
//! suspension point.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use futures::Stream;
use relayclaw_core::error::{Error, Result};
use relayclaw_core::event::Event;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::context::{InvocationContext, Transcript};
use crate::dispatch::{DefaultToolDispatcher, ToolDispatcher};
use crate::invoke::ModelCall;
use crate::postprocess::postprocess;
use crate::preprocess::{preprocess, Prepared};
use crate::processors::{default_request_processors, RequestProcessor, ResponseProcessor};

/// The flow engine: the processors and dispatcher shared by every agent in
/// an invocation.
#[derive(Clone)]
pub struct Flow {
    pub(crate) request_processors: Vec<Arc<dyn RequestProcessor>>,
    pub(crate) response_processors: Vec<Arc<dyn ResponseProcessor>>,
    pub(crate) dispatcher: Arc<dyn ToolDispatcher>,
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl Flow {
    /// A flow with the built-in request processors and the default tool
    /// dispatcher.
    pub fn new() -> Self {
        Self {
            request_processors: default_request_processors(),
            response_processors: Vec::new(),
            dispatcher: Arc::new(DefaultToolDispatcher),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Append a request processor that runs for every agent, after the
    /// built-in ones and before the agent's own.
    pub fn with_request_processor(mut self, processor: Arc<dyn RequestProcessor>) -> Self {
        self.request_processors.push(processor);
        self
    }

    pub fn with_response_processor(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.response_processors.push(processor);
        self
    }

    /// Run the invocation described by `ctx`.
    ///
    /// Must be called within a tokio runtime. The stream ends after the
    /// final event, or after a single `Err` if the run hit a fatal error.
    pub fn run(&self, ctx: InvocationContext) -> EventStream {
        let (tx, rx) = mpsc::channel(ctx.run_config().event_buffer.max(1));
        let flow = self.clone();

        tokio::spawn(async move {
            let mut ctx = ctx;
            let mut sink = EventSink::new(tx, ctx.transcript());
            info!(
                invocation_id = %ctx.invocation_id(),
                agent = ctx.agent().name(),
                streaming = ctx.is_streaming(),
                "Flow starting"
            );

            match run_steps(&flow, &mut ctx, &mut sink).await {
                Ok(()) => info!(
                    invocation_id = %ctx.invocation_id(),
                    events = sink.emitted(),
                    llm_calls = ctx.llm_call_count(),
                    "Flow finished"
                ),
                Err(Error::Cancelled) => debug!(
                    invocation_id = %ctx.invocation_id(),
                    "Flow cancelled by consumer"
                ),
                Err(e) => {
                    warn!(invocation_id = %ctx.invocation_id(), error = %e, "Flow aborted");
                    sink.fail(e).await;
                }
            }
        });

        EventStream::new(rx)
    }
}

/// Run `ctx` with a default [`Flow`].
pub fn run(ctx: InvocationContext) -> EventStream {
    Flow::new().run(ctx)
}

/// The events of one invocation, in order.
pub struct EventStream {
    inner: ReceiverStream<Result<Event>>,
}

impl EventStream {
    fn new(rx: mpsc::Receiver<Result<Event>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// The producing end of an [`EventStream`].
///
/// Every non-partial event is recorded in the invocation transcript before
/// it is sent, so later cycles (and later agents) see it.
pub(crate) struct EventSink {
    tx: mpsc::Sender<Result<Event>>,
    transcript: Arc<Transcript>,
    emitted: usize,
    last: Option<Event>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<Result<Event>>, transcript: Arc<Transcript>) -> Self {
        Self {
            tx,
            transcript,
            emitted: 0,
            last: None,
        }
    }

    pub(crate) async fn emit(&mut self, event: Event) -> Result<()> {
        if !event.partial {
            self.transcript.push(event.clone());
        }
        self.emitted += 1;
        self.last = Some(event.clone());
        self.tx.send(Ok(event)).await.map_err(|_| Error::Cancelled)
    }

    /// Await `fut` unless the consumer goes away first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.tx.closed() => Err(Error::Cancelled),
            output = fut => Ok(output),
        }
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }

    pub(crate) fn last(&self) -> Option<&Event> {
        self.last.as_ref()
    }

    async fn fail(&self, error: Error) {
        let _ = self.tx.send(Err(error)).await;
    }
}

/// Run cycles for `ctx.agent()` until one ends the turn.
///
/// After each cycle the last event yielded so far (which, after a transfer,
/// is the delegated agent's) decides what happens: no new events or a final
/// response stops the loop, a partial event is fatal.
pub(crate) fn run_steps<'a>(
    flow: &'a Flow,
    ctx: &'a mut InvocationContext,
    sink: &'a mut EventSink,
) -> BoxFuture<'a, Result<()>> {
    async move {
        loop {
            debug!(
                invocation_id = %ctx.invocation_id(),
                agent = ctx.agent().name(),
                branch = ctx.branch().unwrap_or_default(),
                llm_calls = ctx.llm_call_count(),
                "Flow step"
            );

            let before = sink.emitted();
            run_one_step(flow, ctx, sink).await?;
            if sink.emitted() == before {
                break;
            }

            let Some(last) = sink.last() else {
                break;
            };
            if last.partial {
                return Err(Error::PartialFinalEvent {
                    event_id: last.id.clone(),
                });
            }
            if ctx.end_invocation || last.is_final_response() {
                break;
            }
        }
        Ok(())
    }
    .boxed()
}

/// One cycle: preprocess, call the model, postprocess each response.
async fn run_one_step(
    flow: &Flow,
    ctx: &mut InvocationContext,
    sink: &mut EventSink,
) -> Result<()> {
    let Some(Prepared { request, tools }) = preprocess(flow, ctx, sink).await? else {
        return Ok(());
    };

    let mut draft = Event::new(ctx.invocation_id(), ctx.agent().name())
        .with_branch(ctx.branch().map(String::from));

    let mut call = ModelCall::start(ctx, request, sink).await?;
    while let Some(response) = call.next(sink).await? {
        // Interceptor actions belong to this response only
        let mut template = draft.clone();
        template.actions.merge(call.take_actions());
        postprocess(flow, ctx, sink, &template, response, &tools).await?;
        if ctx.end_invocation {
            break;
        }
        // Each chunk of one logical response is its own addressable event
        draft.id = Event::new_id();
    }
    Ok(())
}
