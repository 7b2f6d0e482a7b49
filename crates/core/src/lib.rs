//! # relayclaw core
//!
//! Domain types, collaborator traits, and error definitions for the relayclaw
//! agent flow engine. This crate has **no engine logic**. It defines the
//! vocabulary (content, events, model requests and responses, tools) that the
//! flow crate drives and that backends and tools implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`ModelBackend`]: the language model, buffered or streamed
//! - [`Tool`]: something the model can call
//!
//! Implementations live outside this crate, which keeps the engine testable
//! with scripted stand-ins.

pub mod content;
pub mod error;
pub mod event;
pub mod model;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use content::{Content, FunctionCall, FunctionResponse, Part, Role};
pub use error::{Error, ModelError, Result, ToolError};
pub use event::{Event, EventActions};
pub use model::{
    FinishReason, GenerateConfig, ModelBackend, ModelRequest, ModelResponse, ToolDeclaration,
    UsageMetadata,
};
pub use tool::{Tool, ToolContext, ToolRegistry};
