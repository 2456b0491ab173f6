mod flows;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tributary_engine::{Engine, EngineConfig, Interrupt, InterruptSignal, State};
use tributary_results::FsResultStore;
use tributary_store::{FlowRunCreate, RunStore, SqliteStore};

/// Tributary - run flows of tasks with retries, timeouts, and crash tracking
#[derive(Parser)]
#[command(name = "tributary")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tributary)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to an engine configuration file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a bundled flow
  Run {
    /// Name of the flow
    flow: String,

    /// Flow parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
  },

  /// Inspect recorded runs
  Runs {
    #[command(subcommand)]
    target: RunsTarget,
  },

  /// List the bundled flows
  Flows,
}

#[derive(Subcommand)]
enum RunsTarget {
  /// List every flow run
  List,

  /// Show a flow run's state history and its task runs
  Show {
    /// The flow run ID
    flow_run_id: Uuid,
  },
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
  let Some((key, value)) = raw.split_once('=') else {
    bail!("expected key=value, got '{raw}'");
  };
  Ok((key.to_string(), Value::String(value.to_string())))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(data_dir) => data_dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tributary"),
  };

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Run { flow, params }) => {
      rt.block_on(run_flow(flow, params.into_iter().collect(), data_dir, cli.config))
    }
    Some(Commands::Runs { target }) => match target {
      RunsTarget::List => rt.block_on(list_runs(data_dir)),
      RunsTarget::Show { flow_run_id } => rt.block_on(show_run(flow_run_id, data_dir)),
    },
    Some(Commands::Flows) => {
      list_flows();
      Ok(())
    }
    None => {
      println!("tributary - use --help to see available commands");
      Ok(())
    }
  }
}

async fn open_store(data_dir: &Path) -> Result<Arc<SqliteStore>> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let db_path = data_dir.join("runs.db");
  let store = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open run store: {}", db_path.display()))?;
  Ok(Arc::new(store))
}

async fn run_flow(
  flow_name: String,
  params: Map<String, Value>,
  data_dir: PathBuf,
  config_path: Option<PathBuf>,
) -> Result<()> {
  let registry = flows::registry();
  if registry.get(&flow_name).is_none() {
    bail!(
      "flow '{}' not found (available: {})",
      flow_name,
      registry.names().join(", ")
    );
  }

  let config = match config_path {
    Some(path) => EngineConfig::from_file(&path)
      .await
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => EngineConfig::default(),
  };

  let store = open_store(&data_dir).await?;
  let results = Arc::new(FsResultStore::new(data_dir.join("results")));
  let engine = Engine::new(store.clone(), results).with_config(config);

  let flow_run = store
    .create_flow_run(FlowRunCreate::new(&flow_name).with_parameters(params))
    .await
    .context("failed to create flow run")?;
  info!(flow_run_id = %flow_run.id, flow = %flow_name, "flow_run_created");

  let signal = InterruptSignal::new();
  let ctrl_c = {
    let signal = signal.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        signal.raise(Interrupt::aborted("SIGINT"));
      }
    })
  };

  let result = engine
    .retrieve_flow_then_begin_flow_run(flow_run.id, &registry, &signal)
    .await;
  ctrl_c.abort();

  print_run(store.as_ref(), flow_run.id).await?;
  let state = result.context("flow run did not finish")?;

  match state.result() {
    Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
    Err(e) => eprintln!("Flow run ended {}: {e}", state.state_type),
  }
  Ok(())
}

async fn list_runs(data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let flow_runs = store
    .read_flow_runs()
    .await
    .context("failed to read flow runs")?;

  for flow_run in flow_runs {
    println!(
      "{}  {:<20} {:<10} {}",
      flow_run.id,
      flow_run.flow_name,
      flow_run.state.state_type,
      flow_run.created_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
  Ok(())
}

async fn show_run(flow_run_id: Uuid, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  print_run(store.as_ref(), flow_run_id).await
}

async fn print_run(store: &dyn RunStore, flow_run_id: Uuid) -> Result<()> {
  let flow_run = store
    .read_flow_run(flow_run_id)
    .await
    .with_context(|| format!("failed to read flow run {flow_run_id}"))?;
  let states = store
    .read_flow_run_states(flow_run_id)
    .await
    .context("failed to read flow run states")?;

  println!("Flow run {} ({})", flow_run.id, flow_run.flow_name);
  for state in &states {
    println!("  {}", format_state(state));
  }

  let task_runs = store
    .read_task_runs(Some(flow_run_id))
    .await
    .context("failed to read task runs")?;
  for task_run in task_runs {
    println!(
      "  Task run {} ({}-{})",
      task_run.id, task_run.task_key, task_run.dynamic_key
    );
    let states = store
      .read_task_run_states(task_run.id)
      .await
      .context("failed to read task run states")?;
    for state in &states {
      println!("    {}", format_state(state));
    }
  }
  Ok(())
}

fn format_state(state: &State) -> String {
  let mut line = format!(
    "{} {:<10} {:<14}",
    state.timestamp.format("%H:%M:%S%.3f"),
    state.state_type,
    state.name
  );
  if let Some(message) = &state.message {
    line.push(' ');
    line.push_str(message);
  }
  line
}

fn list_flows() {
  let registry = flows::registry();
  for name in registry.names() {
    let Some(flow) = registry.get(name) else {
      continue;
    };
    let params: Vec<String> = flow
      .parameters()
      .iter()
      .map(|(param, spec)| format!("{param}: {:?}", spec.param_type))
      .collect();
    println!("{name}({})", params.join(", "));
  }
}
