//! Agents and the per-invocation agent index.
//!
//! An [`LlmAgent`] is configuration: which backend and instructions to use,
//! which tools it may call, which interceptors and extra processors wrap its
//! cycles, and which sub-agents it can hand off to. The [`AgentIndex`] is
//! built once per top-level invocation so transfer resolution is a plain
//! lookup over the whole tree.

use std::collections::HashMap;
use std::sync::Arc;

use relayclaw_core::error::{Error, Result};
use relayclaw_core::model::{GenerateConfig, ModelBackend};
use relayclaw_core::tool::{Tool, ToolRegistry};

use crate::interceptor::{
    AfterModelInterceptor, AfterToolInterceptor, BeforeModelInterceptor, BeforeToolInterceptor,
};
use crate::processors::{RequestProcessor, ResponseProcessor};

/// A model-driven agent.
pub struct LlmAgent {
    name: String,
    description: String,
    instruction: String,
    /// Only read from the root agent; applies to the whole tree
    global_instruction: String,
    backend: Arc<dyn ModelBackend>,
    model: String,
    generate_config: GenerateConfig,
    tools: ToolRegistry,
    sub_agents: Vec<Arc<LlmAgent>>,
    before_model: Vec<Arc<dyn BeforeModelInterceptor>>,
    after_model: Vec<Arc<dyn AfterModelInterceptor>>,
    before_tool: Vec<Arc<dyn BeforeToolInterceptor>>,
    after_tool: Vec<Arc<dyn AfterToolInterceptor>>,
    request_processors: Vec<Arc<dyn RequestProcessor>>,
    response_processors: Vec<Arc<dyn ResponseProcessor>>,
    disallow_transfer_to_parent: bool,
    disallow_transfer_to_peers: bool,
}

impl LlmAgent {
    /// Create an agent named `name` that talks to `backend`.
    pub fn new(name: impl Into<String>, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            global_instruction: String::new(),
            backend,
            model: String::new(),
            generate_config: GenerateConfig::default(),
            tools: ToolRegistry::new(),
            sub_agents: Vec::new(),
            before_model: Vec::new(),
            after_model: Vec::new(),
            before_tool: Vec::new(),
            after_tool: Vec::new(),
            request_processors: Vec::new(),
            response_processors: Vec::new(),
            disallow_transfer_to_parent: false,
            disallow_transfer_to_peers: false,
        }
    }

    /// Set the model identifier sent with each request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the description other agents see when deciding on a transfer.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_global_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.global_instruction = instruction.into();
        self
    }

    pub fn with_generate_config(mut self, config: GenerateConfig) -> Self {
        self.generate_config = config;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_sub_agent(mut self, agent: LlmAgent) -> Self {
        self.sub_agents.push(Arc::new(agent));
        self
    }

    pub fn with_before_model(mut self, interceptor: Arc<dyn BeforeModelInterceptor>) -> Self {
        self.before_model.push(interceptor);
        self
    }

    pub fn with_after_model(mut self, interceptor: Arc<dyn AfterModelInterceptor>) -> Self {
        self.after_model.push(interceptor);
        self
    }

    pub fn with_before_tool(mut self, interceptor: Arc<dyn BeforeToolInterceptor>) -> Self {
        self.before_tool.push(interceptor);
        self
    }

    pub fn with_after_tool(mut self, interceptor: Arc<dyn AfterToolInterceptor>) -> Self {
        self.after_tool.push(interceptor);
        self
    }

    /// Add a request processor that runs after the built-in ones.
    pub fn with_request_processor(mut self, processor: Arc<dyn RequestProcessor>) -> Self {
        self.request_processors.push(processor);
        self
    }

    /// Add a response processor that runs after the flow-wide ones.
    pub fn with_response_processor(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.response_processors.push(processor);
        self
    }

    pub fn disallow_transfer_to_parent(mut self, disallow: bool) -> Self {
        self.disallow_transfer_to_parent = disallow;
        self
    }

    pub fn disallow_transfer_to_peers(mut self, disallow: bool) -> Self {
        self.disallow_transfer_to_peers = disallow;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn global_instruction(&self) -> &str {
        &self.global_instruction
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generate_config(&self) -> &GenerateConfig {
        &self.generate_config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sub_agents(&self) -> &[Arc<LlmAgent>] {
        &self.sub_agents
    }

    pub fn before_model(&self) -> &[Arc<dyn BeforeModelInterceptor>] {
        &self.before_model
    }

    pub fn after_model(&self) -> &[Arc<dyn AfterModelInterceptor>] {
        &self.after_model
    }

    pub fn before_tool(&self) -> &[Arc<dyn BeforeToolInterceptor>] {
        &self.before_tool
    }

    pub fn after_tool(&self) -> &[Arc<dyn AfterToolInterceptor>] {
        &self.after_tool
    }

    pub fn request_processors(&self) -> &[Arc<dyn RequestProcessor>] {
        &self.request_processors
    }

    pub fn response_processors(&self) -> &[Arc<dyn ResponseProcessor>] {
        &self.response_processors
    }
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field(
                "sub_agents",
                &self.sub_agents.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("before_model", &format!("[{} interceptors]", self.before_model.len()))
            .field("after_model", &format!("[{} interceptors]", self.after_model.len()))
            .finish()
    }
}

/// Name → agent lookup over a whole agent tree.
#[derive(Debug)]
pub struct AgentIndex {
    root: Arc<LlmAgent>,
    by_name: HashMap<String, Arc<LlmAgent>>,
    parents: HashMap<String, Arc<LlmAgent>>,
}

impl AgentIndex {
    /// Walk the tree under `root` once. Agent names must be unique.
    pub fn build(root: Arc<LlmAgent>) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut parents = HashMap::new();
        let mut stack = vec![Arc::clone(&root)];

        while let Some(agent) = stack.pop() {
            let name = agent.name().to_string();
            if by_name.insert(name.clone(), Arc::clone(&agent)).is_some() {
                return Err(Error::DuplicateAgent { name });
            }
            for child in agent.sub_agents() {
                parents.insert(child.name().to_string(), Arc::clone(&agent));
                stack.push(Arc::clone(child));
            }
        }

        Ok(Self {
            root,
            by_name,
            parents,
        })
    }

    pub fn root(&self) -> &Arc<LlmAgent> {
        &self.root
    }

    /// Find an agent anywhere in the tree by exact name.
    pub fn find(&self, name: &str) -> Option<Arc<LlmAgent>> {
        self.by_name.get(name).cloned()
    }

    pub fn parent_of(&self, name: &str) -> Option<&Arc<LlmAgent>> {
        self.parents.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Agents `agent` is offered as transfer targets: its sub-agents, then
    /// its parent and its peers unless the agent disallows them.
    pub fn transfer_targets(&self, agent: &LlmAgent) -> Vec<Arc<LlmAgent>> {
        let mut targets: Vec<Arc<LlmAgent>> = agent.sub_agents().to_vec();

        let Some(parent) = self.parent_of(agent.name()) else {
            return targets;
        };
        if !agent.disallow_transfer_to_parent {
            targets.push(Arc::clone(parent));
        }
        if !agent.disallow_transfer_to_peers {
            targets.extend(
                parent
                    .sub_agents()
                    .iter()
                    .filter(|peer| peer.name() != agent.name())
                    .cloned(),
            );
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedBackend;

    fn backend() -> Arc<dyn ModelBackend> {
        Arc::new(ScriptedBackend::new(vec![]))
    }

    fn tree() -> Arc<LlmAgent> {
        Arc::new(
            LlmAgent::new("root", backend())
                .with_sub_agent(
                    LlmAgent::new("support", backend())
                        .with_sub_agent(LlmAgent::new("billing", backend()))
                        .with_sub_agent(
                            LlmAgent::new("refunds", backend()).disallow_transfer_to_peers(true),
                        ),
                )
                .with_sub_agent(LlmAgent::new("sales", backend())),
        )
    }

    #[test]
    fn index_finds_agents_at_any_depth() {
        let index = AgentIndex::build(tree()).unwrap();
        assert_eq!(index.len(), 5);
        assert!(index.find("billing").is_some());
        assert!(index.find("ghost").is_none());
        assert_eq!(index.parent_of("billing").unwrap().name(), "support");
        assert!(index.parent_of("root").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let root = Arc::new(
            LlmAgent::new("root", backend())
                .with_sub_agent(LlmAgent::new("twin", backend()))
                .with_sub_agent(
                    LlmAgent::new("other", backend())
                        .with_sub_agent(LlmAgent::new("twin", backend())),
                ),
        );
        let err = AgentIndex::build(root).unwrap_err();
        assert!(matches!(err, Error::DuplicateAgent { name } if name == "twin"));
    }

    #[test]
    fn transfer_targets_include_children_parent_and_peers() {
        let index = AgentIndex::build(tree()).unwrap();
        let support = index.find("support").unwrap();
        let names: Vec<String> = index
            .transfer_targets(&support)
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["billing", "refunds", "root", "sales"]);
    }

    #[test]
    fn transfer_targets_respect_disallow_flags() {
        let index = AgentIndex::build(tree()).unwrap();
        let refunds = index.find("refunds").unwrap();
        let names: Vec<String> = index
            .transfer_targets(&refunds)
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["support"]);
    }

    #[test]
    fn root_without_children_has_no_targets() {
        let index = AgentIndex::build(Arc::new(LlmAgent::new("solo", backend()))).unwrap();
        let solo = index.root().clone();
        assert!(index.transfer_targets(&solo).is_empty());
    }
}
