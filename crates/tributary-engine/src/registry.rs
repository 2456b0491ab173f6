//! Locating flow definitions for stored flow runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tributary_state::FlowRun;

use crate::error::EngineError;
use crate::flow::Flow;

/// Resolves the flow definition a stored flow run should execute.
#[async_trait]
pub trait FlowLoader: Send + Sync {
  async fn load_flow(&self, flow_run: &FlowRun) -> Result<Flow, EngineError>;
}

/// An in-process map of flow name to definition.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
  flows: HashMap<String, Flow>,
}

impl FlowRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a flow under its name, replacing any previous definition.
  pub fn register(&mut self, flow: Flow) {
    self.flows.insert(flow.name().to_string(), flow);
  }

  pub fn with(mut self, flow: Flow) -> Self {
    self.register(flow);
    self
  }

  pub fn get(&self, name: &str) -> Option<&Flow> {
    self.flows.get(name)
  }

  /// Registered flow names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<_> = self.flows.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}

#[async_trait]
impl FlowLoader for FlowRegistry {
  async fn load_flow(&self, flow_run: &FlowRun) -> Result<Flow, EngineError> {
    self
      .get(&flow_run.flow_name)
      .cloned()
      .ok_or_else(|| EngineError::FlowNotFound(flow_run.flow_name.clone()))
  }
}
