//! Flow definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tributary_resolver::{Param, ParamSpec, ParamType, Parameters};
use tributary_state::RunError;

use crate::context::FlowRunContext;
use crate::retry::RetryDelay;

type FlowBody =
  Arc<dyn Fn(FlowRunContext, Parameters) -> BoxFuture<'static, Result<Param, RunError>> + Send + Sync>;

/// A declared pipeline.
///
/// The body receives a [`FlowRunContext`] for calling tasks and subflows, and
/// the flow-run parameters already cast to their declared types. Whatever
/// the body returns becomes the flow run's result; failed task states found
/// in it fail the flow run.
#[derive(Clone)]
pub struct Flow {
  name: String,
  body: FlowBody,
  parameters: BTreeMap<String, ParamSpec>,
  retries: u32,
  retry_delay: RetryDelay,
  timeout: Option<Duration>,
}

impl Flow {
  pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
  where
    F: Fn(FlowRunContext, Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Param, RunError>> + Send + 'static,
  {
    Self {
      name: name.into(),
      body: Arc::new(move |context, parameters| body(context, parameters).boxed()),
      parameters: BTreeMap::new(),
      retries: 0,
      retry_delay: RetryDelay::default(),
      timeout: None,
    }
  }

  /// Declare a required parameter.
  pub fn with_parameter(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
    self
      .parameters
      .insert(name.into(), ParamSpec::required(param_type));
    self
  }

  /// Declare a parameter with a default value.
  pub fn with_parameter_default(
    mut self,
    name: impl Into<String>,
    param_type: ParamType,
    default: Value,
  ) -> Self {
    self
      .parameters
      .insert(name.into(), ParamSpec::with_default(param_type, default));
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  pub fn with_retry_delay(mut self, retry_delay: RetryDelay) -> Self {
    self.retry_delay = retry_delay;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn parameters(&self) -> &BTreeMap<String, ParamSpec> {
    &self.parameters
  }

  pub fn retries(&self) -> u32 {
    self.retries
  }

  pub fn retry_delay(&self) -> &RetryDelay {
    &self.retry_delay
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  pub(crate) fn call(
    &self,
    context: FlowRunContext,
    parameters: Parameters,
  ) -> BoxFuture<'static, Result<Param, RunError>> {
    (self.body)(context, parameters)
  }
}

impl fmt::Debug for Flow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Flow")
      .field("name", &self.name)
      .field("parameters", &self.parameters)
      .field("retries", &self.retries)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}
