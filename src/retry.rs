//! Sleep-and-retry policies for the non-blocking bus operations.
//!
//! Queue operations never wait. Every empty/full condition is resolved by the
//! caller sleeping for a while and trying again; this module makes the wait
//! a pluggable [`Backoff`] and checks the [`ShutdownSignal`] between attempts.

use crate::shutdown::ShutdownSignal;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Produces the delay before the next attempt.
pub trait Backoff: Send {
    fn next_delay(&mut self) -> Duration;

    /// Called after a successful attempt.
    fn reset(&mut self) {}
}

/// Uniformly random delay in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomBackoff {
    min: Duration,
    max: Duration,
}

impl RandomBackoff {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Backoff for RandomBackoff {
    fn next_delay(&mut self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let nanos =
            rand::thread_rng().gen_range(self.min.as_nanos() as u64..=self.max.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

/// Delay that grows by `factor` per attempt up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: u32) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(1),
            current: initial,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How a retry loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded after `attempts` tries.
    Completed { value: T, attempts: u64 },
    /// The operation failed with an error that must not be retried.
    Failed(E),
    /// Shutdown was observed before the operation succeeded.
    Cancelled { attempts: u64 },
}

/// Run `op` until it succeeds, fails permanently, or shutdown is observed.
///
/// `retryable` decides which errors are transient. Shutdown is checked before
/// every attempt, never during one.
pub async fn retry_until_shutdown<T, E, F, R>(
    shutdown: &ShutdownSignal,
    backoff: &mut dyn Backoff,
    mut retryable: R,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: FnMut(&E) -> bool,
{
    let mut attempts = 0u64;
    loop {
        if shutdown.is_triggered() {
            return RetryOutcome::Cancelled { attempts };
        }

        attempts += 1;
        match op() {
            Ok(value) => {
                backoff.reset();
                return RetryOutcome::Completed { value, attempts };
            }
            Err(e) if retryable(&e) => sleep(backoff.next_delay()).await,
            Err(e) => return RetryOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_backoff_stays_in_bounds() {
        let mut backoff = RandomBackoff::new(Duration::from_millis(1), Duration::from_millis(10));
        for _ in 0..1000 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_random_backoff_orders_bounds() {
        let backoff = RandomBackoff::new(Duration::from_millis(9), Duration::from_millis(2));
        assert_eq!(backoff.min(), Duration::from_millis(2));
        assert_eq!(backoff.max(), Duration::from_millis(9));

        let mut fixed = RandomBackoff::new(Duration::from_millis(3), Duration::from_millis(3));
        assert_eq!(fixed.next_delay(), Duration::from_millis(3));
    }

    #[test]
    fn test_exponential_backoff_caps_and_resets() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_retry_completes_after_transient_failures() {
        let shutdown = ShutdownSignal::new();
        let mut backoff = RandomBackoff::new(Duration::ZERO, Duration::from_micros(10));
        let mut calls = 0;

        let outcome = retry_until_shutdown(
            &shutdown,
            &mut backoff,
            |e: &&str| *e == "busy",
            || {
                calls += 1;
                if calls < 3 {
                    Err("busy")
                } else {
                    Ok(calls)
                }
            },
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Completed {
                value: 3,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let shutdown = ShutdownSignal::new();
        let mut backoff = RandomBackoff::new(Duration::ZERO, Duration::ZERO);
        let outcome: RetryOutcome<(), &str> =
            retry_until_shutdown(&shutdown, &mut backoff, |e: &&str| *e == "busy", || {
                Err("broken")
            })
            .await;
        assert_eq!(outcome, RetryOutcome::Failed("broken"));
    }

    #[tokio::test]
    async fn test_retry_observes_shutdown_between_attempts() {
        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        let mut backoff = RandomBackoff::new(Duration::from_micros(1), Duration::from_micros(1));
        let mut calls = 0;

        let outcome: RetryOutcome<(), &str> = retry_until_shutdown(
            &shutdown,
            &mut backoff,
            |_| true,
            || {
                calls += 1;
                if calls == 4 {
                    trigger.trigger();
                }
                Err("empty")
            },
        )
        .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 4 });
    }
}
