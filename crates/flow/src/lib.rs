//! # relayclaw flow
//!
//! The agent turn-execution loop. One invocation drives an agent through
//! repeated cycles of building a model request, calling the model (buffered
//! or streamed), executing the tool calls it asks for, and handing off to
//! another agent when asked, until a final answer is produced.
//!
//! ```text
//! Flow::run(ctx) ──► run_steps ──► preprocess ──► ModelCall ──► postprocess
//!                       ▲                                          │
//!                       └──────────── transfer (derived ctx) ◄─────┘
//! ```
//!
//! Everything the loop produces comes out of one [`EventStream`]. Backend
//! and tool failures arrive as ordinary events; only broken invariants
//! (a partial final event, an unknown transfer target, the call limit) end
//! the stream with an `Err`.

pub mod agent;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod interceptor;
mod invoke;
mod postprocess;
mod preprocess;
pub mod processors;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::{AgentIndex, LlmAgent};
pub use context::{CallbackContext, InvocationContext, LlmCallCounter, Transcript};
pub use dispatch::{DefaultToolDispatcher, ToolDispatcher, TransferToAgentTool};
pub use driver::{run, EventStream, Flow};
pub use interceptor::{
    AfterModelInterceptor, AfterToolInterceptor, BeforeModelInterceptor, BeforeToolInterceptor,
};
pub use processors::{RequestProcessor, ResponseProcessor};
