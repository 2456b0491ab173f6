use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tributary_state::{Deployment, FlowRun, State, TaskRun};
use uuid::Uuid;

use crate::rules::{RunOwner, accept_proposal};
use crate::{Error, FlowRunCreate, RunStore, TaskRunCreate};

/// SQLite-based run store implementation.
///
/// States are stored as JSON text. The current state of a run is denormalized
/// onto its row; the full history lives in `run_states`.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  ///
  /// The pool holds a single connection so that state proposals are
  /// serialized.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!().run(&self.pool).await?;
    Ok(())
  }

  async fn owner(tx: &mut Transaction<'_, Sqlite>, run_id: Uuid) -> Result<(RunOwner, State), Error> {
    let id = run_id.to_string();

    let flow: Option<(String,)> = sqlx::query_as("SELECT state FROM flow_runs WHERE id = ?")
      .bind(&id)
      .fetch_optional(&mut **tx)
      .await?;
    if let Some((state,)) = flow {
      return Ok((RunOwner::Flow(run_id), serde_json::from_str(&state)?));
    }

    let task: Option<(String, String)> =
      sqlx::query_as("SELECT flow_run_id, state FROM task_runs WHERE id = ?")
        .bind(&id)
        .fetch_optional(&mut **tx)
        .await?;
    match task {
      Some((flow_run_id, state)) => Ok((
        RunOwner::Task {
          id: run_id,
          flow_run_id: parse_uuid(&flow_run_id)?,
        },
        serde_json::from_str(&state)?,
      )),
      None => Err(Error::NotFound {
        kind: "run",
        id: run_id,
      }),
    }
  }

  async fn append(
    tx: &mut Transaction<'_, Sqlite>,
    owner: RunOwner,
    state: State,
  ) -> Result<State, Error> {
    let state = owner.stamp(state);
    let encoded = serde_json::to_string(&state)?;

    let (run_id, table) = match owner {
      RunOwner::Flow(id) => (id, "flow_runs"),
      RunOwner::Task { id, .. } => (id, "task_runs"),
    };
    let id = run_id.to_string();

    sqlx::query(
      r#"
            INSERT INTO run_states (run_id, seq, state)
            VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM run_states WHERE run_id = ?), ?)
            "#,
    )
    .bind(&id)
    .bind(&id)
    .bind(&encoded)
    .execute(&mut **tx)
    .await?;

    sqlx::query(&format!("UPDATE {table} SET state = ? WHERE id = ?"))
      .bind(&encoded)
      .bind(&id)
      .execute(&mut **tx)
      .await?;

    Ok(state)
  }

  async fn read_states(&self, run_id: Uuid) -> Result<Vec<State>, Error> {
    let rows: Vec<(String,)> =
      sqlx::query_as("SELECT state FROM run_states WHERE run_id = ? ORDER BY seq ASC")
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

    rows
      .into_iter()
      .map(|(state,)| serde_json::from_str(&state).map_err(Error::from))
      .collect()
  }
}

#[derive(sqlx::FromRow)]
struct FlowRunRow {
  id: String,
  flow_name: String,
  parameters: String,
  parent_task_run_id: Option<String>,
  deployment_id: Option<String>,
  state: String,
  created_at: DateTime<Utc>,
}

impl TryFrom<FlowRunRow> for FlowRun {
  type Error = Error;

  fn try_from(row: FlowRunRow) -> Result<Self, Error> {
    Ok(FlowRun {
      id: parse_uuid(&row.id)?,
      flow_name: row.flow_name,
      parameters: serde_json::from_str(&row.parameters)?,
      parent_task_run_id: row.parent_task_run_id.as_deref().map(parse_uuid).transpose()?,
      deployment_id: row.deployment_id.as_deref().map(parse_uuid).transpose()?,
      state: serde_json::from_str(&row.state)?,
      created_at: row.created_at,
    })
  }
}

#[derive(sqlx::FromRow)]
struct TaskRunRow {
  id: String,
  flow_run_id: String,
  task_key: String,
  dynamic_key: String,
  state: String,
  created_at: DateTime<Utc>,
}

impl TryFrom<TaskRunRow> for TaskRun {
  type Error = Error;

  fn try_from(row: TaskRunRow) -> Result<Self, Error> {
    Ok(TaskRun {
      id: parse_uuid(&row.id)?,
      flow_run_id: parse_uuid(&row.flow_run_id)?,
      task_key: row.task_key,
      dynamic_key: row.dynamic_key,
      state: serde_json::from_str(&row.state)?,
      created_at: row.created_at,
    })
  }
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
  id: String,
  flow_name: String,
  name: String,
  created_at: DateTime<Utc>,
}

impl TryFrom<DeploymentRow> for Deployment {
  type Error = Error;

  fn try_from(row: DeploymentRow) -> Result<Self, Error> {
    Ok(Deployment {
      id: parse_uuid(&row.id)?,
      flow_name: row.flow_name,
      name: row.name,
      created_at: row.created_at,
    })
  }
}

fn parse_uuid(value: &str) -> Result<Uuid, Error> {
  Uuid::parse_str(value).map_err(|e| Error::InvalidRecord(format!("bad id '{value}': {e}")))
}

#[async_trait]
impl RunStore for SqliteStore {
  async fn create_flow_run(&self, create: FlowRunCreate) -> Result<FlowRun, Error> {
    let id = Uuid::new_v4();
    let state = RunOwner::Flow(id).stamp(create.state);
    let run = FlowRun {
      id,
      flow_name: create.flow_name,
      parameters: create.parameters,
      parent_task_run_id: create.parent_task_run_id,
      deployment_id: create.deployment_id,
      state,
      created_at: Utc::now(),
    };
    let encoded = serde_json::to_string(&run.state)?;

    let mut tx = self.pool.begin().await?;
    sqlx::query(
      r#"
            INSERT INTO flow_runs (id, flow_name, parameters, parent_task_run_id, deployment_id, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(run.id.to_string())
    .bind(&run.flow_name)
    .bind(serde_json::to_string(&run.parameters)?)
    .bind(run.parent_task_run_id.map(|id| id.to_string()))
    .bind(run.deployment_id.map(|id| id.to_string()))
    .bind(&encoded)
    .bind(run.created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO run_states (run_id, seq, state) VALUES (?, 1, ?)")
      .bind(run.id.to_string())
      .bind(&encoded)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;

    Ok(run)
  }

  async fn create_task_run(&self, create: TaskRunCreate) -> Result<TaskRun, Error> {
    let mut tx = self.pool.begin().await?;

    let parent: Option<(String,)> = sqlx::query_as("SELECT id FROM flow_runs WHERE id = ?")
      .bind(create.flow_run_id.to_string())
      .fetch_optional(&mut *tx)
      .await?;
    if parent.is_none() {
      return Err(Error::NotFound {
        kind: "flow run",
        id: create.flow_run_id,
      });
    }

    let id = Uuid::new_v4();
    let owner = RunOwner::Task {
      id,
      flow_run_id: create.flow_run_id,
    };
    let run = TaskRun {
      id,
      flow_run_id: create.flow_run_id,
      task_key: create.task_key,
      dynamic_key: create.dynamic_key,
      state: owner.stamp(create.state),
      created_at: Utc::now(),
    };
    let encoded = serde_json::to_string(&run.state)?;

    sqlx::query(
      r#"
            INSERT INTO task_runs (id, flow_run_id, task_key, dynamic_key, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(run.id.to_string())
    .bind(run.flow_run_id.to_string())
    .bind(&run.task_key)
    .bind(&run.dynamic_key)
    .bind(&encoded)
    .bind(run.created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO run_states (run_id, seq, state) VALUES (?, 1, ?)")
      .bind(run.id.to_string())
      .bind(&encoded)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;

    Ok(run)
  }

  async fn create_deployment(&self, flow_name: &str, name: &str) -> Result<Deployment, Error> {
    let deployment = Deployment {
      id: Uuid::new_v4(),
      flow_name: flow_name.to_string(),
      name: name.to_string(),
      created_at: Utc::now(),
    };

    sqlx::query("INSERT INTO deployments (id, flow_name, name, created_at) VALUES (?, ?, ?, ?)")
      .bind(deployment.id.to_string())
      .bind(&deployment.flow_name)
      .bind(&deployment.name)
      .bind(deployment.created_at)
      .execute(&self.pool)
      .await?;

    Ok(deployment)
  }

  async fn read_deployment(&self, deployment_id: Uuid) -> Result<Deployment, Error> {
    let row: Option<DeploymentRow> = sqlx::query_as(
      "SELECT id, flow_name, name, created_at FROM deployments WHERE id = ?",
    )
    .bind(deployment_id.to_string())
    .fetch_optional(&self.pool)
    .await?;

    row
      .ok_or(Error::NotFound {
        kind: "deployment",
        id: deployment_id,
      })?
      .try_into()
  }

  async fn read_flow_run(&self, flow_run_id: Uuid) -> Result<FlowRun, Error> {
    let row: Option<FlowRunRow> = sqlx::query_as(
      r#"
            SELECT id, flow_name, parameters, parent_task_run_id, deployment_id, state, created_at
            FROM flow_runs
            WHERE id = ?
            "#,
    )
    .bind(flow_run_id.to_string())
    .fetch_optional(&self.pool)
    .await?;

    row
      .ok_or(Error::NotFound {
        kind: "flow run",
        id: flow_run_id,
      })?
      .try_into()
  }

  async fn read_flow_runs(&self) -> Result<Vec<FlowRun>, Error> {
    let rows: Vec<FlowRunRow> = sqlx::query_as(
      r#"
            SELECT id, flow_name, parameters, parent_task_run_id, deployment_id, state, created_at
            FROM flow_runs
            ORDER BY created_at ASC, rowid ASC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(FlowRun::try_from).collect()
  }

  async fn read_task_run(&self, task_run_id: Uuid) -> Result<TaskRun, Error> {
    let row: Option<TaskRunRow> = sqlx::query_as(
      r#"
            SELECT id, flow_run_id, task_key, dynamic_key, state, created_at
            FROM task_runs
            WHERE id = ?
            "#,
    )
    .bind(task_run_id.to_string())
    .fetch_optional(&self.pool)
    .await?;

    row
      .ok_or(Error::NotFound {
        kind: "task run",
        id: task_run_id,
      })?
      .try_into()
  }

  async fn read_task_runs(&self, flow_run_id: Option<Uuid>) -> Result<Vec<TaskRun>, Error> {
    let rows: Vec<TaskRunRow> = sqlx::query_as(
      r#"
            SELECT id, flow_run_id, task_key, dynamic_key, state, created_at
            FROM task_runs
            WHERE ?1 IS NULL OR flow_run_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
    )
    .bind(flow_run_id.map(|id| id.to_string()))
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(TaskRun::try_from).collect()
  }

  async fn read_flow_run_states(&self, flow_run_id: Uuid) -> Result<Vec<State>, Error> {
    self.read_flow_run(flow_run_id).await?;
    self.read_states(flow_run_id).await
  }

  async fn read_task_run_states(&self, task_run_id: Uuid) -> Result<Vec<State>, Error> {
    self.read_task_run(task_run_id).await?;
    self.read_states(task_run_id).await
  }

  async fn propose_state(&self, run_id: Uuid, state: State) -> Result<State, Error> {
    let mut tx = self.pool.begin().await?;
    let (owner, current) = Self::owner(&mut tx, run_id).await?;

    let Some(accepted) = accept_proposal(&current, state) else {
      tracing::debug!(
        run_id = %run_id,
        current = %current.state_type,
        "rejected state proposal after terminal state"
      );
      return Ok(current);
    };

    let accepted = Self::append(&mut tx, owner, accepted).await?;
    tx.commit().await?;
    Ok(accepted)
  }

  async fn set_state(&self, run_id: Uuid, state: State) -> Result<State, Error> {
    let mut tx = self.pool.begin().await?;
    let (owner, _) = Self::owner(&mut tx, run_id).await?;
    let state = Self::append(&mut tx, owner, state).await?;
    tx.commit().await?;
    Ok(state)
  }
}
