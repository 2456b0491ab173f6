//! Flows bundled with the CLI.

use std::time::Duration;

use serde_json::{Value, json};
use tributary_engine::{
  Flow, FlowRegistry, Param, ParamType, Parameters, RetryBackoff, RetryDelay, RunError, Task,
  parameters,
};

/// Every bundled flow, by name.
pub fn registry() -> FlowRegistry {
  FlowRegistry::new()
    .with(hello())
    .with(fails_in_middle())
    .with(flaky())
}

/// Greets `name` through a single task.
fn hello() -> Flow {
  let greet = Task::new("greet", |call| async move {
    let name = call.value("name")?;
    let name = name.as_str().unwrap_or("world");
    Ok(json!(format!("Hello, {name}!")))
  });

  Flow::new("hello", move |ctx, params| {
    let greet = greet.clone();
    async move {
      let name = params
        .get("name")
        .cloned()
        .unwrap_or(Param::Value(json!("world")));
      let greeting = ctx.call_value(&greet, parameters([("name", name)])).await?;
      Ok(Param::Value(greeting))
    }
  })
  .with_parameter_default("name", ParamType::String, json!("world"))
}

/// A parent task fans out to two children; the first fails, so the grandchild
/// that depends on it is never ready. The flow returns nothing and is judged
/// by the runs it started.
fn fails_in_middle() -> Flow {
  let parent = Task::new("parent", |_call| async { Ok(json!(256)) });
  let first_child = Task::new("first-child", |call| async move {
    let input = call.value("from_parent")?;
    Err::<Value, _>(RunError::application(
      "ValueError",
      format!("child task intentionally failed on {input}"),
    ))
  });
  let second_child = Task::new("second-child", |_call| async { Ok(json!(42)) });
  let grandchild = Task::new("grandchild", |_call| async { Ok(json!(512)) });

  Flow::new("fails-in-middle", move |ctx, _params| {
    let (parent, first_child, second_child, grandchild) = (
      parent.clone(),
      first_child.clone(),
      second_child.clone(),
      grandchild.clone(),
    );
    async move {
      let from_parent = ctx.submit(&parent, Parameters::new()).await?;
      let c1 = ctx
        .submit(&first_child, parameters([("from_parent", from_parent.clone())]))
        .await?;
      ctx
        .submit(&second_child, parameters([("from_parent", from_parent)]))
        .await?;
      ctx
        .submit(&grandchild, parameters([("from_child", c1)]))
        .await?;
      Ok(Param::Value(Value::Null))
    }
  })
}

/// A task that fails `failures` times before succeeding, retried with
/// exponential backoff.
fn flaky() -> Flow {
  let unreliable = Task::new("unreliable", |call| async move {
    let failures = call.value("failures")?.as_u64().unwrap_or_default();
    if u64::from(call.attempt) <= failures {
      return Err(RunError::application(
        "ConnectionError",
        format!("attempt {} failed", call.attempt),
      ));
    }
    Ok(json!({ "attempts": call.attempt }))
  })
  .with_retries(3)
  .with_retry_delay(RetryDelay::Backoff {
    base: Duration::from_millis(200),
    backoff: RetryBackoff::Exponential,
  });

  Flow::new("flaky", move |ctx, params| {
    let unreliable = unreliable.clone();
    async move {
      let failures = params
        .get("failures")
        .cloned()
        .unwrap_or(Param::Value(json!(2)));
      let state = ctx
        .call(&unreliable, parameters([("failures", failures)]))
        .await?;
      Ok(Param::State(state))
    }
  })
  .with_parameter_default("failures", ParamType::Integer, json!(2))
}
