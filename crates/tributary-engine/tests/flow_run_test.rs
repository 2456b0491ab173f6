//! Flow run orchestration through the public entry points.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use common::{Fault, FaultyStore, flow_run_names, flow_run_state, harness, task_run_names};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tributary_engine::{
  ChannelNotifier, ConcurrentTaskRunner, Engine, EngineError, Flow, FlowRegistry, InterruptSignal, Param, ParamType, Parameters,
  RunError, RunEvent, SequentialTaskRunner, State, Task, Timer, parameters,
};
use tributary_results::{MemoryResultStore, ResultStore};
use tributary_state::{Interrupt, ResultError, StateResult};
use tributary_store::RunStore;

fn echo() -> Task {
  Task::new("echo", |call| async move { call.value("x") })
}

fn params(value: Value) -> Map<String, Value> {
  match value {
    Value::Object(map) => map,
    _ => Map::new(),
  }
}

/// A flow whose body waits for its signal and then unwinds with the reason.
fn cooperative(name: &str) -> Flow {
  Flow::new(name, |ctx, _params| async move {
    ctx.signal().raised().await;
    Err(RunError::Interrupted(ctx.signal().reason()))
  })
}

#[tokio::test]
async fn test_flow_completes_with_returned_value() {
  let h = harness();
  let echo = echo();
  let flow = Flow::new("pipeline", move |ctx, _params| {
    let echo = echo.clone();
    async move {
      let value = ctx.call_value(&echo, parameters([("x", json!("hi"))])).await?;
      Ok(Param::Value(json!({ "echoed": value })))
    }
  });
  let flow_run = common::flow_run(&*h.store, "pipeline").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_completed());
  assert_eq!(state.result().unwrap(), json!({ "echoed": "hi" }));
  assert_eq!(
    flow_run_names(&*h.store, flow_run.id).await,
    vec!["Pending", "Running", "Completed"]
  );
  assert_eq!(
    h.results.retrieve(&flow_run.id.to_string()).await.unwrap(),
    json!({ "echoed": "hi" })
  );
}

#[tokio::test]
async fn test_dynamic_keys_count_per_task_and_reset_in_subflows() {
  let h = harness();
  let a = Task::new("a", |_call| async { Ok(json!(null)) });
  let b = Task::new("b", |_call| async { Ok(json!(null)) });

  let child = {
    let a = a.clone();
    Flow::new("child", move |ctx, _params| {
      let a = a.clone();
      async move {
        ctx.call(&a, Parameters::new()).await?;
        ctx.call(&a, Parameters::new()).await?;
        Ok(Param::Value(json!(null)))
      }
    })
  };
  let parent = Flow::new("parent", move |ctx, _params| {
    let (a, b, child) = (a.clone(), b.clone(), child.clone());
    async move {
      for _ in 0..3 {
        ctx.call(&a, Parameters::new()).await?;
      }
      ctx.call_flow(&child, Map::new()).await?;
      for _ in 0..2 {
        ctx.call(&b, Parameters::new()).await?;
      }
      Ok(Param::Value(json!(null)))
    }
  });
  let flow_run = common::flow_run(&*h.store, "parent").await;

  let state = h
    .engine
    .begin_flow_run(&parent, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();
  assert!(state.is_completed(), "{state:?}");

  let keys = |runs: Vec<tributary_state::TaskRun>| {
    runs
      .into_iter()
      .map(|run| (run.task_key, run.dynamic_key))
      .collect::<Vec<_>>()
  };
  let pair = |key: &str, dynamic: &str| (key.to_string(), dynamic.to_string());

  assert_eq!(
    keys(h.store.read_task_runs(Some(flow_run.id)).await.unwrap()),
    vec![
      pair("a", "0"),
      pair("a", "1"),
      pair("a", "2"),
      pair("child", "0"),
      pair("b", "0"),
      pair("b", "1"),
    ]
  );

  let child_run = h
    .store
    .read_flow_runs()
    .await
    .unwrap()
    .into_iter()
    .find(|run| run.parent_task_run_id.is_some())
    .unwrap();
  assert_eq!(
    keys(h.store.read_task_runs(Some(child_run.id)).await.unwrap()),
    vec![pair("a", "0"), pair("a", "1")]
  );

  // The subflow's task run in the parent mirrors the subflow's final state
  let parent_task_run_id = child_run.parent_task_run_id.unwrap();
  assert_eq!(
    task_run_names(&*h.store, parent_task_run_id).await,
    vec!["Pending", "Running", "Completed"]
  );
}

#[tokio::test]
async fn test_returned_failed_state_fails_the_flow() {
  let h = harness();
  let boom = Task::new("boom", |_call| async { Err(RunError::application("ValueError", "boom")) });
  let ok = Task::new("ok", |_call| async { Ok(json!(1)) });
  let flow = Flow::new("mixed", move |ctx, _params| {
    let (boom, ok) = (boom.clone(), ok.clone());
    async move {
      let first = ctx.submit(&ok, Parameters::new()).await?;
      let second = ctx.submit(&boom, Parameters::new()).await?;
      Ok(Param::List(vec![Param::Future(first), Param::Future(second)]))
    }
  });
  let flow_run = common::flow_run(&*h.store, "mixed").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(state.message.as_deref(), Some("1/2 states failed."));
  let StateResult::States(states) = state.payload() else {
    panic!("expected the returned states, got {:?}", state.payload());
  };
  assert_eq!(states.len(), 2);
}

#[tokio::test]
async fn test_unreturned_failures_do_not_fail_the_flow() {
  let h = harness();
  let boom = Task::new("boom", |_call| async { Err(RunError::application("ValueError", "boom")) });
  let flow = Flow::new("ignores-failure", move |ctx, _params| {
    let boom = boom.clone();
    async move {
      let state = ctx.call(&boom, Parameters::new()).await?;
      Ok(Param::Value(json!(state.is_failed())))
    }
  });
  let flow_run = common::flow_run(&*h.store, "ignores-failure").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_completed());
  assert_eq!(state.result().unwrap(), json!(true));
}

#[tokio::test]
async fn test_submitted_tasks_finish_before_the_flow() {
  let h = harness();
  let slow = Task::new("slow", |_call| async {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(json!("late"))
  });
  let flow = Flow::new("fire-and-forget", move |ctx, _params| {
    let slow = slow.clone();
    async move {
      ctx.submit(&slow, Parameters::new()).await?;
      Ok(Param::Value(json!(null)))
    }
  });
  let flow_run = common::flow_run(&*h.store, "fire-and-forget").await;

  h.engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  let task_runs = h.store.read_task_runs(Some(flow_run.id)).await.unwrap();
  assert_eq!(task_runs.len(), 1);
  assert!(task_runs[0].state.is_completed());
}

#[tokio::test]
async fn test_wait_for_failed_upstream_is_not_ready() {
  let h = harness();
  let boom = Task::new("boom", |_call| async { Err(RunError::application("ValueError", "boom")) });
  let after = Task::new("after", |_call| async { Ok(json!(null)) });
  let flow = Flow::new("ordered", move |ctx, _params| {
    let (boom, after) = (boom.clone(), after.clone());
    async move {
      let upstream = ctx.submit(&boom, Parameters::new()).await?;
      let state = ctx
        .submit_with(&after, Parameters::new(), vec![upstream])
        .await?
        .wait()
        .await?;
      Ok(Param::Value(json!(state.name)))
    }
  });
  let flow_run = common::flow_run(&*h.store, "ordered").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert_eq!(state.result().unwrap(), json!("NotReady"));
}

#[tokio::test]
async fn test_flow_retries_after_raising() {
  let h = harness();
  let attempts = Arc::new(AtomicU32::new(0));
  let flow = {
    let attempts = attempts.clone();
    Flow::new("flaky", move |_ctx, _params| {
      let attempts = attempts.clone();
      async move {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
          Err(RunError::application("ValueError", "first attempt"))
        } else {
          Ok(Param::Value(json!("second")))
        }
      }
    })
    .with_retries(1)
  };
  let flow_run = common::flow_run(&*h.store, "flaky").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_completed());
  assert_eq!(attempts.load(Ordering::SeqCst), 2);
  assert_eq!(
    flow_run_names(&*h.store, flow_run.id).await,
    vec!["Pending", "Running", "AwaitingRetry", "Running", "Completed"]
  );
}

#[tokio::test]
async fn test_flow_body_error_fails_the_flow() {
  let h = harness();
  let flow = Flow::new("raises", |_ctx, _params| async {
    Err(RunError::application("ValueError", "bad input"))
  });
  let flow_run = common::flow_run(&*h.store, "raises").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(
    state.message.as_deref(),
    Some("Flow run encountered an exception: ValueError: bad input")
  );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_flow_crashes_and_reraises() {
  let h = harness();
  let flow = Flow::new("sleepy", |_ctx, _params| std::future::pending::<Result<Param, RunError>>());
  let flow_run = common::flow_run(&*h.store, "sleepy").await;
  let signal = InterruptSignal::new();

  let cancel = async {
    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.cancel();
  };
  let empty = Map::new();
  let (result, ()) = tokio::join!(
    h.engine
      .begin_flow_run(&flow, flow_run.clone(), &empty, &signal),
    cancel
  );

  assert!(matches!(result, Err(EngineError::Interrupted(Interrupt::Cancelled))));
  let state = flow_run_state(&*h.store, flow_run.id).await;
  assert!(state.is_crashed());
  assert_eq!(
    state.message.as_deref(),
    Some("Execution was cancelled by the runtime environment.")
  );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_subflow_crashes_every_level() {
  let h = harness();
  let child = cooperative("child");
  let parent = Flow::new("parent", move |ctx, _params| {
    let child = child.clone();
    async move {
      ctx.call_flow(&child, Map::new()).await?;
      Ok(Param::Value(json!(null)))
    }
  });
  let flow_run = common::flow_run(&*h.store, "parent").await;
  let signal = InterruptSignal::new();

  let cancel = async {
    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.cancel();
  };
  let empty = Map::new();
  let (result, ()) = tokio::join!(
    h.engine
      .begin_flow_run(&parent, flow_run.clone(), &empty, &signal),
    cancel
  );

  assert!(matches!(result, Err(EngineError::Interrupted(Interrupt::Cancelled))));

  let runs = h.store.read_flow_runs().await.unwrap();
  assert_eq!(runs.len(), 2);
  for run in &runs {
    assert!(run.state.is_crashed(), "{}: {:?}", run.flow_name, run.state);
    assert_eq!(
      run.state.message.as_deref(),
      Some("Execution was cancelled by the runtime environment.")
    );
  }

  let task_runs = h.store.read_task_runs(Some(flow_run.id)).await.unwrap();
  assert_eq!(task_runs.len(), 1);
  assert!(task_runs[0].state.is_crashed());
}

#[tokio::test]
async fn test_abort_raised_in_flow_body_crashes_and_reraises() {
  let h = harness();
  let flow = Flow::new("aborts", |_ctx, _params| async {
    Err(RunError::Interrupted(Interrupt::aborted("SIGINT")))
  });
  let flow_run = common::flow_run(&*h.store, "aborts").await;

  let result = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await;

  assert!(matches!(
    result,
    Err(EngineError::Interrupted(Interrupt::Aborted { .. }))
  ));
  let state = flow_run_state(&*h.store, flow_run.id).await;
  assert!(state.is_crashed());
  assert_eq!(
    state.message.as_deref(),
    Some("Execution was aborted by an interrupt signal.")
  );
  assert!(matches!(
    state.result(),
    Err(ResultError::Interrupted {
      reraise_safe: false,
      ..
    })
  ));
}

#[tokio::test]
async fn test_abort_raised_in_subflow_body_reaches_the_caller() {
  let h = harness();
  let child = Flow::new("child", |_ctx, _params| async {
    Err(RunError::Interrupted(Interrupt::aborted("SIGINT")))
  });
  let parent = Flow::new("parent", move |ctx, _params| {
    let child = child.clone();
    async move {
      ctx.call_flow(&child, Map::new()).await?;
      Ok(Param::Value(json!("unreachable")))
    }
  });
  let flow_run = common::flow_run(&*h.store, "parent").await;

  let result = h
    .engine
    .begin_flow_run(&parent, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await;

  assert!(matches!(
    result,
    Err(EngineError::Interrupted(Interrupt::Aborted { .. }))
  ));
  for run in h.store.read_flow_runs().await.unwrap() {
    assert_eq!(
      run.state.message.as_deref(),
      Some("Execution was aborted by an interrupt signal."),
      "{}",
      run.flow_name
    );
  }
}

#[tokio::test(start_paused = true)]
async fn test_flow_timeout_fails_instead_of_crashing() {
  let h = harness();
  let flow = Flow::new("slow", |_ctx, _params| std::future::pending::<Result<Param, RunError>>())
    .with_timeout(Duration::from_secs(2));
  let flow_run = common::flow_run(&*h.store, "slow").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(
    state.message.as_deref(),
    Some("Flow run exceeded timeout of 2 seconds")
  );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_timeout_still_crashes() {
  let h = harness();
  let flow = cooperative("guarded").with_timeout(Duration::from_secs(60));
  let flow_run = common::flow_run(&*h.store, "guarded").await;
  let signal = InterruptSignal::new();

  let cancel = async {
    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.cancel();
  };
  let empty = Map::new();
  let (result, ()) = tokio::join!(
    h.engine
      .begin_flow_run(&flow, flow_run.clone(), &empty, &signal),
    cancel
  );

  assert!(matches!(result, Err(EngineError::Interrupted(Interrupt::Cancelled))));
  assert!(flow_run_state(&*h.store, flow_run.id).await.is_crashed());
}

#[tokio::test]
async fn test_task_store_failure_crashes_task_and_fails_flow() {
  let store = Arc::new(FaultyStore::new(Fault::FailTaskProposals));
  let engine = Engine::new(store.clone(), Arc::new(MemoryResultStore::new()));
  let noop = Task::new("noop", |_call| async { Ok(json!(null)) });
  let flow = Flow::new("fragile", move |ctx, _params| {
    let noop = noop.clone();
    async move {
      ctx.call(&noop, Parameters::new()).await?;
      Ok(Param::Value(Value::Null))
    }
  });
  let flow_run = common::flow_run(&*store, "fragile").await;

  let state = engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(state.message.as_deref(), Some("1/1 states failed."));
  let StateResult::States(states) = &state.data else {
    panic!("expected the task run states, got {:?}", state.data);
  };
  assert_eq!(states.len(), 1);
  assert!(states[0].is_crashed());
  assert!(
    states[0]
      .message
      .as_deref()
      .unwrap()
      .contains("Execution was interrupted by an unexpected exception")
  );

  let task_runs = store.read_task_runs(Some(flow_run.id)).await.unwrap();
  assert!(task_runs[0].state.is_crashed());
}

#[tokio::test]
async fn test_flow_returning_nothing_is_judged_by_its_runs() {
  let h = harness();
  let ok = Task::new("ok", |_call| async { Ok(json!(1)) });
  let boom = Task::new("boom", |_call| async { Err(RunError::application("ValueError", "boom")) });
  let flow = Flow::new("returns-nothing", move |ctx, _params| {
    let (ok, boom) = (ok.clone(), boom.clone());
    async move {
      ctx.submit(&ok, Parameters::new()).await?;
      ctx.submit(&boom, Parameters::new()).await?;
      Ok(Param::Value(Value::Null))
    }
  });
  let flow_run = common::flow_run(&*h.store, "returns-nothing").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(state.message.as_deref(), Some("1/2 states failed."));
  assert!(flow_run_state(&*h.store, flow_run.id).await.is_failed());
}

#[tokio::test]
async fn test_flow_returning_nothing_counts_failed_subflows() {
  let h = harness();
  let boom = Task::new("boom", |_call| async { Err(RunError::application("ValueError", "boom")) });
  let child = Flow::new("child", move |ctx, _params| {
    let boom = boom.clone();
    async move {
      ctx.submit(&boom, Parameters::new()).await?;
      Ok(Param::Value(Value::Null))
    }
  });
  let parent = Flow::new("parent", move |ctx, _params| {
    let child = child.clone();
    async move {
      ctx.call_flow(&child, Map::new()).await?;
      Ok(Param::Value(Value::Null))
    }
  });
  let flow_run = common::flow_run(&*h.store, "parent").await;

  let state = h
    .engine
    .begin_flow_run(&parent, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(state.message.as_deref(), Some("1/1 states failed."));
}

/// A task body that panics on every attempt.
fn panicking() -> Task {
  Task::new("explodes", |_call| async {
    let explode = true;
    if explode {
      panic!("boom");
    }
    Ok(json!(null))
  })
}

async fn assert_task_panic_is_recorded(engine: Engine, store: &dyn RunStore) {
  let explodes = panicking();
  let flow = Flow::new("panics", move |ctx, _params| {
    let explodes = explodes.clone();
    async move {
      ctx.submit(&explodes, Parameters::new()).await?;
      Ok(Param::Value(Value::Null))
    }
  });
  let flow_run = common::flow_run(store, "panics").await;

  let state = engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(state.message.as_deref(), Some("1/1 states failed."));

  let task_runs = store.read_task_runs(Some(flow_run.id)).await.unwrap();
  let task_state = &task_runs[0].state;
  assert!(task_state.is_crashed(), "{task_state:?}");
  assert!(task_state.message.as_deref().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_panicking_task_is_crashed_with_concurrent_runner() {
  let h = harness();
  let engine = h.engine.clone().with_task_runner(Arc::new(ConcurrentTaskRunner));
  assert_task_panic_is_recorded(engine, &*h.store).await;
}

#[tokio::test]
async fn test_panicking_task_is_crashed_with_sequential_runner() {
  let h = harness();
  let engine = h.engine.clone().with_task_runner(Arc::new(SequentialTaskRunner));
  assert_task_panic_is_recorded(engine, &*h.store).await;
}

#[tokio::test]
async fn test_panicking_flow_body_is_crashed() {
  let h = harness();
  let flow = Flow::new("panics", |_ctx, _params| async {
    let explode = true;
    if explode {
      panic!("flow boom");
    }
    Ok(Param::Value(Value::Null))
  });
  let flow_run = common::flow_run(&*h.store, "panics").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_crashed());
  assert!(state.message.as_deref().unwrap().contains("flow boom"));
  assert!(flow_run_state(&*h.store, flow_run.id).await.is_crashed());
}

#[tokio::test]
async fn test_dynamic_keys_continue_across_flow_retries() {
  let h = harness();
  let a = Task::new("a", |_call| async { Ok(json!(null)) });
  let attempts = Arc::new(AtomicU32::new(0));
  let flow = {
    let attempts = attempts.clone();
    Flow::new("retried", move |ctx, _params| {
      let (a, attempts) = (a.clone(), attempts.clone());
      async move {
        ctx.call(&a, Parameters::new()).await?;
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
          return Err(RunError::application("ValueError", "first attempt"));
        }
        Ok(Param::Value(Value::Null))
      }
    })
    .with_retries(1)
  };
  let flow_run = common::flow_run(&*h.store, "retried").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();
  assert!(state.is_completed());

  let dynamic_keys: Vec<String> = h
    .store
    .read_task_runs(Some(flow_run.id))
    .await
    .unwrap()
    .into_iter()
    .map(|run| run.dynamic_key)
    .collect();
  assert_eq!(dynamic_keys, vec!["0", "1"]);
}

#[tokio::test]
async fn test_parameters_are_cast_before_the_body_runs() {
  let h = harness();
  let flow = Flow::new("typed", |_ctx, params| async move {
    Ok(params.get("x").cloned().unwrap_or(Param::Value(Value::Null)))
  })
  .with_parameter("x", ParamType::Integer);
  let flow_run = common::flow_run(&*h.store, "typed").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &params(json!({ "x": "1" })), &InterruptSignal::new())
    .await
    .unwrap();

  assert_eq!(state.result().unwrap(), json!(1));
}

#[tokio::test]
async fn test_invalid_parameters_fail_before_the_body_runs() {
  let h = harness();
  let ran = Arc::new(AtomicBool::new(false));
  let flow = {
    let ran = ran.clone();
    Flow::new("typed", move |_ctx, _params| {
      let ran = ran.clone();
      async move {
        ran.store(true, Ordering::SeqCst);
        Ok(Param::Value(json!(null)))
      }
    })
    .with_parameter("x", ParamType::Integer)
  };
  let flow_run = common::flow_run(&*h.store, "typed").await;

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run.clone(), &params(json!({ "x": "one" })), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_failed());
  assert_eq!(
    state.message.as_deref(),
    Some("Flow run received invalid parameters.")
  );
  match state.result() {
    Err(ResultError::Raised(record)) => assert_eq!(record.kind, "ParameterTypeError"),
    other => panic!("expected the validation error, got {other:?}"),
  }
  assert!(!ran.load(Ordering::SeqCst));
  assert_eq!(
    flow_run_names(&*h.store, flow_run.id).await,
    vec!["Pending", "Failed"]
  );
}

#[tokio::test]
async fn test_deployment_run_is_retrieved_and_begun() {
  let h = harness();
  let registry = FlowRegistry::new().with(
    Flow::new("typed", |_ctx, params| async move {
      Ok(params.get("x").cloned().unwrap_or(Param::Value(Value::Null)))
    })
    .with_parameter("x", ParamType::Integer),
  );

  let deployment = h.store.create_deployment("typed", "nightly").await.unwrap();
  let flow_run = h
    .store
    .create_flow_run_from_deployment(deployment.id, params(json!({ "x": "7" })))
    .await
    .unwrap();
  assert_eq!(flow_run.deployment_id, Some(deployment.id));

  let state = h
    .engine
    .retrieve_flow_then_begin_flow_run(flow_run.id, &registry, &InterruptSignal::new())
    .await
    .unwrap();

  assert_eq!(state.result().unwrap(), json!(7));
}

#[tokio::test]
async fn test_unknown_flow_is_not_found() {
  let h = harness();
  let flow_run = common::flow_run(&*h.store, "missing").await;

  let result = h
    .engine
    .retrieve_flow_then_begin_flow_run(flow_run.id, &FlowRegistry::new(), &InterruptSignal::new())
    .await;

  assert!(matches!(result, Err(EngineError::FlowNotFound(name)) if name == "missing"));
}

#[tokio::test]
async fn test_scheduled_flow_run_waits_for_its_start() {
  let h = harness();
  let flow = Flow::new("later", |_ctx, _params| async { Ok(Param::Value(json!(null))) });
  let flow_run = h
    .store
    .create_flow_run(
      tributary_store::FlowRunCreate::new("later")
        .with_state(State::scheduled(h.timer.now() + chrono::Duration::seconds(90))),
    )
    .await
    .unwrap();

  let state = h
    .engine
    .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();

  assert!(state.is_completed());
  assert_eq!(h.timer.sleeps(), vec![Duration::from_secs(90)]);
}

#[tokio::test]
async fn test_sequential_runner_and_events() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let h = harness();
  let engine = h
    .engine
    .clone()
    .with_task_runner(Arc::new(SequentialTaskRunner))
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));
  let echo = echo();
  let flow = Flow::new("evented", move |ctx, _params| {
    let echo = echo.clone();
    async move {
      let state = ctx.call(&echo, parameters([("x", json!(3))])).await?;
      Ok(Param::State(state))
    }
  });
  let flow_run = common::flow_run(&*h.store, "evented").await;

  let state = engine
    .begin_flow_run(&flow, flow_run.clone(), &Map::new(), &InterruptSignal::new())
    .await
    .unwrap();
  assert_eq!(state.result().unwrap(), json!(3));

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(
    events.first(),
    Some(RunEvent::FlowRunStarted { flow_run_id, .. }) if *flow_run_id == flow_run.id
  ));
  assert!(events.iter().any(|event| matches!(
    event,
    RunEvent::TaskRunCreated { task_key, dynamic_key, .. } if task_key == "echo" && dynamic_key == "0"
  )));
  assert!(matches!(
    events.last(),
    Some(RunEvent::StateChanged { run_id, name, .. }) if *run_id == flow_run.id && name == "Completed"
  ));
}
