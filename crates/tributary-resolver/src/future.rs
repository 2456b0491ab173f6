use tokio::sync::watch;
use tributary_state::{Interrupt, State, StateResult};
use uuid::Uuid;

/// How a submitted run ended: its final state, or the interrupt that unwound it.
pub type Outcome = Result<State, Interrupt>;

/// A handle to the eventual state of another run.
///
/// Futures are cheap to clone. Every clone observes the same outcome once the
/// paired [`FutureResolver`] reports it.
#[derive(Debug, Clone)]
pub struct RunFuture {
  run_id: Uuid,
  receiver: watch::Receiver<Option<Outcome>>,
}

/// The write side of a [`RunFuture`].
#[derive(Debug)]
pub struct FutureResolver {
  sender: watch::Sender<Option<Outcome>>,
}

impl RunFuture {
  /// Create an unresolved future for a run.
  pub fn new(run_id: Uuid) -> (Self, FutureResolver) {
    let (sender, receiver) = watch::channel(None);
    (Self { run_id, receiver }, FutureResolver { sender })
  }

  /// Create a future that is already resolved.
  pub fn ready(run_id: Uuid, outcome: Outcome) -> Self {
    let (sender, receiver) = watch::channel(Some(outcome));
    drop(sender);
    Self { run_id, receiver }
  }

  pub fn run_id(&self) -> Uuid {
    self.run_id
  }

  /// The outcome, if the run has already reported one.
  pub fn outcome(&self) -> Option<Outcome> {
    self.receiver.borrow().clone()
  }

  /// Wait for the run to report its outcome.
  ///
  /// A run whose resolver is dropped without reporting resolves to a
  /// `Crashed` state.
  pub async fn wait(&self) -> Outcome {
    let mut receiver = self.receiver.clone();
    let reported = match receiver.wait_for(Option::is_some).await {
      Ok(value) => (*value).clone(),
      Err(_) => None,
    };
    reported.unwrap_or_else(|| Ok(abandoned(self.run_id)))
  }

  /// The final state, mapping an interrupt to the `Crashed` state it causes.
  pub async fn state(&self) -> State {
    match self.wait().await {
      Ok(state) => state,
      Err(interrupt) => State::crashed_by(&interrupt),
    }
  }
}

impl FutureResolver {
  /// Report the outcome. Every clone of the paired future observes it.
  pub fn resolve(self, outcome: Outcome) {
    self.sender.send_replace(Some(outcome));
  }
}

fn abandoned(run_id: Uuid) -> State {
  let mut state = State::crashed(
    "Run was abandoned before reporting a final state.",
    StateResult::None,
  );
  state.details.task_run_id = Some(run_id);
  state
}
