//! The clock and sleep capability used for scheduled starts and retry delays.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of the current time and of suspension.
#[async_trait]
pub trait Timer: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Suspend the calling orchestration without blocking others.
  async fn sleep(&self, duration: Duration);
}

/// Wall clock and tokio sleep.
#[derive(Debug, Clone, Default)]
pub struct SystemTimer;

#[async_trait]
impl Timer for SystemTimer {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  async fn sleep(&self, duration: Duration) {
    tokio::time::sleep(duration).await;
  }
}

/// A virtual clock for tests. Built with `cfg(test)` or the `test-util`
/// feature.
///
/// Time stands still until something sleeps; each sleep is recorded and
/// advances the clock by the slept duration without waiting.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug)]
pub struct MockTimer {
  start: DateTime<Utc>,
  state: std::sync::Mutex<MockState>,
}

#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
struct MockState {
  elapsed: Duration,
  sleeps: Vec<Duration>,
}

#[cfg(any(test, feature = "test-util"))]
impl MockTimer {
  pub fn new() -> Self {
    Self::starting_at(Utc::now())
  }

  pub fn starting_at(start: DateTime<Utc>) -> Self {
    Self {
      start,
      state: std::sync::Mutex::new(MockState::default()),
    }
  }

  /// Every sleep requested so far, in order.
  pub fn sleeps(&self) -> Vec<Duration> {
    self
      .state
      .lock()
      .map(|state| state.sleeps.clone())
      .unwrap_or_default()
  }
}

#[cfg(any(test, feature = "test-util"))]
impl Default for MockTimer {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Timer for MockTimer {
  fn now(&self) -> DateTime<Utc> {
    let elapsed = self
      .state
      .lock()
      .map(|state| state.elapsed)
      .unwrap_or_default();
    self.start + chrono::Duration::from_std(elapsed).unwrap_or_default()
  }

  async fn sleep(&self, duration: Duration) {
    if let Ok(mut state) = self.state.lock() {
      state.elapsed += duration;
      state.sleeps.push(duration);
    }
    tokio::task::yield_now().await;
  }
}
