//! Invocation-scoped state.
//!
//! One [`InvocationContext`] exists per running agent within a top-level
//! request. A transfer derives a new context for the target agent that
//! shares the invocation id, the LLM call counter and the transcript through
//! `Arc`s, so accounting spans the whole delegation tree. `end_invocation`
//! is plain per-instance state and is never inherited.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use relayclaw_config::{FlowConfig, RunConfig};
use relayclaw_core::error::{Error, Result};
use relayclaw_core::event::{Event, EventActions};
use uuid::Uuid;

use crate::agent::{AgentIndex, LlmAgent};

/// Counts model calls across every context derived from one invocation.
#[derive(Debug)]
pub struct LlmCallCounter {
    count: AtomicU32,
    /// 0 = unlimited
    limit: u32,
}

impl LlmCallCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            limit,
        }
    }

    /// Record one model call and return the new total.
    ///
    /// Fails once the total goes past a non-zero limit.
    pub fn increment(&self) -> Result<u32> {
        let total = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.limit > 0 && total > self.limit {
            return Err(Error::LlmCallLimitExceeded { limit: self.limit });
        }
        Ok(total)
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// Working history of one invocation.
///
/// Seeded by the caller with prior session events and the user message; the
/// step driver appends every non-partial event it yields. Request processors
/// read it to build `contents`. Persistence stays with the caller.
#[derive(Debug, Default)]
pub struct Transcript {
    events: RwLock<Vec<Event>>,
}

impl Transcript {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    pub fn push(&self, event: Event) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutable state for the agent currently running within an invocation.
#[derive(Debug)]
pub struct InvocationContext {
    invocation_id: String,
    agent: Arc<LlmAgent>,
    agents: Arc<AgentIndex>,
    /// Delegation lineage, dot-delimited (`root.billing`)
    branch: Option<String>,
    llm_calls: Arc<LlmCallCounter>,
    transcript: Arc<Transcript>,
    config: Arc<FlowConfig>,

    /// Set by a request or response processor to skip the rest of the cycle.
    pub end_invocation: bool,
}

impl InvocationContext {
    /// Create the top-level context for `root`.
    ///
    /// Indexes the whole agent tree once; fails if two agents share a name.
    pub fn new(root: Arc<LlmAgent>) -> Result<Self> {
        let agents = Arc::new(AgentIndex::build(Arc::clone(&root))?);
        let config = FlowConfig::default();
        Ok(Self {
            invocation_id: format!("inv-{}", Uuid::new_v4()),
            branch: Some(root.name().to_string()),
            agent: root,
            agents,
            llm_calls: Arc::new(LlmCallCounter::new(config.run.max_llm_calls)),
            transcript: Arc::new(Transcript::default()),
            config: Arc::new(config),
            end_invocation: false,
        })
    }

    /// Use `config` for this invocation. Resets the LLM call counter.
    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.llm_calls = Arc::new(LlmCallCounter::new(config.run.max_llm_calls));
        self.config = Arc::new(config);
        self
    }

    pub fn with_run_config(self, run: RunConfig) -> Self {
        let mut config = (*self.config).clone();
        config.run = run;
        self.with_config(config)
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    /// Seed the transcript with prior session events.
    pub fn with_history(self, events: Vec<Event>) -> Self {
        for event in events {
            self.transcript.push(event);
        }
        self
    }

    /// Append the user's message that triggered this invocation.
    pub fn with_user_message(self, text: impl Into<String>) -> Self {
        let event = Event::user_message(self.invocation_id.clone(), text);
        self.transcript.push(event);
        self
    }

    /// Derive the context a transfer target runs in.
    pub fn derive_for(&self, agent: Arc<LlmAgent>) -> Self {
        let branch = match &self.branch {
            Some(branch) => format!("{branch}.{}", agent.name()),
            None => agent.name().to_string(),
        };
        Self {
            invocation_id: self.invocation_id.clone(),
            agent,
            agents: Arc::clone(&self.agents),
            branch: Some(branch),
            llm_calls: Arc::clone(&self.llm_calls),
            transcript: Arc::clone(&self.transcript),
            config: Arc::clone(&self.config),
            end_invocation: false,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn agent(&self) -> &Arc<LlmAgent> {
        &self.agent
    }

    pub fn agents(&self) -> &AgentIndex {
        &self.agents
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Handle on the shared counter; stays valid after the context is moved
    /// into a running flow.
    pub fn llm_calls(&self) -> Arc<LlmCallCounter> {
        Arc::clone(&self.llm_calls)
    }

    pub fn llm_call_count(&self) -> u32 {
        self.llm_calls.get()
    }

    pub fn transcript(&self) -> Arc<Transcript> {
        Arc::clone(&self.transcript)
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.config.run
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.config.labels
    }

    pub fn is_streaming(&self) -> bool {
        self.config.run.streaming_mode.is_streaming()
    }
}

/// What a model interceptor sees.
///
/// `actions` is the side channel: anything set here lands on the events the
/// current response produces.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub invocation_id: String,
    pub agent_name: String,
    pub branch: Option<String>,
    pub llm_call_count: u32,
    pub actions: EventActions,
}

impl CallbackContext {
    pub fn new(ctx: &InvocationContext) -> Self {
        Self {
            invocation_id: ctx.invocation_id().to_string(),
            agent_name: ctx.agent().name().to_string(),
            branch: ctx.branch.clone(),
            llm_call_count: ctx.llm_call_count(),
            actions: EventActions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedBackend;

    fn tree() -> Arc<LlmAgent> {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        Arc::new(
            LlmAgent::new("root", backend.clone())
                .with_sub_agent(LlmAgent::new("billing", backend)),
        )
    }

    #[test]
    fn counter_enforces_limit() {
        let counter = LlmCallCounter::new(2);
        assert_eq!(counter.increment().unwrap(), 1);
        assert_eq!(counter.increment().unwrap(), 2);
        let err = counter.increment().unwrap_err();
        assert!(matches!(err, Error::LlmCallLimitExceeded { limit: 2 }));
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let counter = LlmCallCounter::new(0);
        for _ in 0..1000 {
            counter.increment().unwrap();
        }
        assert_eq!(counter.get(), 1000);
    }

    #[test]
    fn top_level_branch_is_root_name() {
        let ctx = InvocationContext::new(tree()).unwrap();
        assert_eq!(ctx.branch(), Some("root"));
        assert!(ctx.invocation_id().starts_with("inv-"));
    }

    #[test]
    fn derived_context_shares_counter_and_extends_branch() {
        let mut ctx = InvocationContext::new(tree())
            .unwrap()
            .with_user_message("hi");
        ctx.end_invocation = true;

        let billing = ctx.agents().find("billing").unwrap();
        let sub = ctx.derive_for(billing);
        assert_eq!(sub.branch(), Some("root.billing"));
        assert_eq!(sub.invocation_id(), ctx.invocation_id());
        assert!(!sub.end_invocation);

        sub.llm_calls().increment().unwrap();
        assert_eq!(ctx.llm_call_count(), 1);
        assert_eq!(sub.transcript().len(), 1);
    }

    #[test]
    fn with_config_applies_call_limit() {
        let mut config = FlowConfig::default();
        config.run.max_llm_calls = 7;
        let ctx = InvocationContext::new(tree()).unwrap().with_config(config);
        assert_eq!(ctx.llm_calls().limit(), 7);
    }

    #[test]
    fn callback_context_snapshots_identity() {
        let ctx = InvocationContext::new(tree())
            .unwrap()
            .with_invocation_id("inv-fixed");
        let cb = CallbackContext::new(&ctx);
        assert_eq!(cb.invocation_id, "inv-fixed");
        assert_eq!(cb.agent_name, "root");
        assert!(cb.actions.is_empty());
    }
}
