//! Retry delay policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows between retries of a [`RetryDelay::Backoff`] policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  #[default]
  Constant,
  Linear,
  Exponential,
}

/// The wait between a failed attempt and the next one.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDelay {
  Fixed(Duration),
  /// One delay per retry. The last entry repeats once the sequence runs out.
  Sequence(Vec<Duration>),
  Backoff {
    base: Duration,
    backoff: RetryBackoff,
  },
}

impl Default for RetryDelay {
  fn default() -> Self {
    Self::Fixed(Duration::ZERO)
  }
}

impl RetryDelay {
  /// The delay after the given failed attempt (1 for the first attempt).
  pub fn delay(&self, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    match self {
      Self::Fixed(delay) => *delay,
      Self::Sequence(delays) => {
        let index = (attempt as usize - 1).min(delays.len().saturating_sub(1));
        delays.get(index).copied().unwrap_or(Duration::ZERO)
      }
      Self::Backoff { base, backoff } => match backoff {
        RetryBackoff::Constant => *base,
        RetryBackoff::Linear => base.saturating_mul(attempt),
        RetryBackoff::Exponential => {
          let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
          base.saturating_mul(factor)
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sequence_repeats_last() {
    let delay = RetryDelay::Sequence(vec![Duration::from_secs(1), Duration::from_secs(5)]);
    assert_eq!(delay.delay(1), Duration::from_secs(1));
    assert_eq!(delay.delay(2), Duration::from_secs(5));
    assert_eq!(delay.delay(7), Duration::from_secs(5));
    assert_eq!(RetryDelay::Sequence(vec![]).delay(1), Duration::ZERO);
  }

  #[test]
  fn test_backoff() {
    let base = Duration::from_secs(2);
    let linear = RetryDelay::Backoff {
      base,
      backoff: RetryBackoff::Linear,
    };
    let exponential = RetryDelay::Backoff {
      base,
      backoff: RetryBackoff::Exponential,
    };

    assert_eq!(linear.delay(3), Duration::from_secs(6));
    assert_eq!(exponential.delay(1), Duration::from_secs(2));
    assert_eq!(exponential.delay(3), Duration::from_secs(8));
  }
}
