//! Task definitions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tributary_resolver::{Param, Parameters};
use tributary_state::{RunError, TaskRun};

use crate::retry::RetryDelay;
use crate::signal::InterruptSignal;

type TaskBody = Arc<dyn Fn(TaskCall) -> BoxFuture<'static, Result<Value, RunError>> + Send + Sync>;

/// What a task body receives for one attempt.
#[derive(Debug, Clone)]
pub struct TaskCall {
  pub task_run: TaskRun,
  /// 1 for the first attempt, incremented on each retry.
  pub attempt: u32,
  /// Resolved parameters: references to other runs are already substituted.
  pub parameters: Parameters,
  /// Raised when the attempt should stop (interrupt or timeout).
  pub signal: InterruptSignal,
}

impl TaskCall {
  pub fn param(&self, name: &str) -> Option<&Param> {
    self.parameters.get(name)
  }

  /// A parameter as plain JSON.
  pub fn value(&self, name: &str) -> Result<Value, RunError> {
    self
      .param(name)
      .map(Param::to_json)
      .ok_or_else(|| RunError::application("KeyError", format!("missing parameter '{name}'")))
  }
}

/// A declared unit of work.
///
/// The task key identifies the task within a flow run; repeated calls of the
/// same task get increasing dynamic keys.
#[derive(Clone)]
pub struct Task {
  key: String,
  body: TaskBody,
  retries: u32,
  retry_delay: RetryDelay,
  timeout: Option<Duration>,
}

impl Task {
  pub fn new<F, Fut>(key: impl Into<String>, body: F) -> Self
  where
    F: Fn(TaskCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RunError>> + Send + 'static,
  {
    Self {
      key: key.into(),
      body: Arc::new(move |call| body(call).boxed()),
      retries: 0,
      retry_delay: RetryDelay::default(),
      timeout: None,
    }
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

  pub fn key(&self) -> &str {
    &self.key
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

  pub(crate) fn call(&self, call: TaskCall) -> BoxFuture<'static, Result<Value, RunError>> {
    (self.body)(call)
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("key", &self.key)
      .field("retries", &self.retries)
      .field("retry_delay", &self.retry_delay)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}
