//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. The flow
//! engine never runs them itself; it hands function calls to a dispatcher,
//! which looks them up here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::event::EventActions;
use crate::model::ToolDeclaration;

/// What a running tool can see and influence.
///
/// `actions` is the documented side channel: a tool sets
/// `transfer_to_agent`, `skip_summarization` or requests authorization here,
/// and the dispatcher copies it onto the function-response event.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub invocation_id: String,
    pub agent_name: String,
    pub function_call_id: String,
    pub actions: EventActions,
}

impl ToolContext {
    pub fn new(
        invocation_id: impl Into<String>,
        agent_name: impl Into<String>,
        function_call_id: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            agent_name: agent_name.into(),
            function_call_id: function_call_id.into(),
            actions: EventActions::default(),
        }
    }

    /// Ask the user to authorize this call out of band.
    pub fn request_auth(&mut self, auth_config: serde_json::Value) {
        self.actions
            .requested_auth_configs
            .insert(self.function_call_id.clone(), auth_config);
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "transfer_to_agent").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether results arrive out of band, after the turn ends.
    fn is_long_running(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a declaration for the model.
    fn to_declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    /// All tool declarations, in registration order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.to_declaration()).collect()
    }

    /// Whether `name` maps to a long-running tool.
    pub fn is_long_running(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.is_long_running())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
