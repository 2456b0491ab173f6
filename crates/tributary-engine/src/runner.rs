//! Task runners: how a flow run executes the task runs it submits.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tributary_resolver::{Outcome, RunFuture};
use uuid::Uuid;

use crate::config::TaskRunnerKind;

/// A unit of work: one orchestrated task run.
pub type RunUnit = BoxFuture<'static, Outcome>;

/// Executes submitted task runs and hands back a future for each.
#[async_trait]
pub trait TaskRunner: Send + Sync {
  async fn submit(&self, run_id: Uuid, unit: RunUnit) -> RunFuture;
}

/// Runs each unit to completion before returning.
#[derive(Debug, Clone, Default)]
pub struct SequentialTaskRunner;

#[async_trait]
impl TaskRunner for SequentialTaskRunner {
  async fn submit(&self, run_id: Uuid, unit: RunUnit) -> RunFuture {
    RunFuture::ready(run_id, unit.await)
  }
}

/// Spawns each unit onto the tokio runtime.
///
/// A unit that panics drops its resolver, so its future resolves to a
/// `Crashed` state.
#[derive(Debug, Clone, Default)]
pub struct ConcurrentTaskRunner;

#[async_trait]
impl TaskRunner for ConcurrentTaskRunner {
  async fn submit(&self, run_id: Uuid, unit: RunUnit) -> RunFuture {
    let (future, resolver) = RunFuture::new(run_id);
    tokio::spawn(async move {
      resolver.resolve(unit.await);
    });
    future
  }
}

pub(crate) fn task_runner_for(kind: TaskRunnerKind) -> std::sync::Arc<dyn TaskRunner> {
  match kind {
    TaskRunnerKind::Sequential => std::sync::Arc::new(SequentialTaskRunner),
    TaskRunnerKind::Concurrent => std::sync::Arc::new(ConcurrentTaskRunner),
  }
}
