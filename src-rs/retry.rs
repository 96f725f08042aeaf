use tracing::debug;

use crate::clock::{duration_ms, Pacer, SystemPacer};
use crate::config::RetryConfig;

/// Run `operation` up to `config.max_retries()` times, pausing
/// `initial_delay * 2^i` after failed attempt `i` (never after the last one).
///
/// Returns the first success, or the error from the final attempt unchanged.
/// The operation runs again after every failure, so it must be safe to repeat.
pub fn retry_with_backoff<T, E, F>(operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    retry_with_backoff_using(&SystemPacer, operation, config)
}

/// [`retry_with_backoff`] with an explicit time source.
pub fn retry_with_backoff_using<C, T, E, F>(
    pacer: &C,
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, E>
where
    C: Pacer + ?Sized,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = config.max_retries().max(1);
    let mut attempt = 0u32;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 >= max_attempts => {
                debug!(attempts = max_attempts, "retry budget exhausted");
                return Err(err);
            }
            Err(_) => {
                let delay = config.delay_for(attempt);
                debug!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = duration_ms(delay),
                    "attempt failed, backing off"
                );
                pacer.sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::VirtualPacer;
    use std::time::{Duration, Instant};

    #[derive(Debug, PartialEq)]
    struct Flaky(&'static str);

    fn budget(max: u32, initial_ms: u64) -> RetryConfig {
        RetryConfig::new(max, Duration::from_millis(initial_ms)).unwrap()
    }

    #[test]
    fn success_after_n_minus_one_failures() {
        let pacer = VirtualPacer::new();
        let mut calls = 0;
        let value = retry_with_backoff_using(
            &pacer,
            || {
                calls += 1;
                if calls < 3 {
                    Err(Flaky("paste raced"))
                } else {
                    Ok("pasted")
                }
            },
            &budget(3, 100),
        )
        .unwrap();

        assert_eq!(value, "pasted");
        assert_eq!(calls, 3);
        assert_eq!(
            pacer.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn first_success_returns_without_delay() {
        let pacer = VirtualPacer::new();
        let mut calls = 0;
        let value: Result<u8, Flaky> = retry_with_backoff_using(
            &pacer,
            || {
                calls += 1;
                Ok(7)
            },
            &budget(5, 100),
        );
        assert_eq!(value, Ok(7));
        assert_eq!(calls, 1);
        assert!(pacer.sleeps().is_empty());
    }

    #[test]
    fn exhaustion_returns_last_error_verbatim() {
        let pacer = VirtualPacer::new();
        let mut calls = 0;
        let err = retry_with_backoff_using(
            &pacer,
            || -> Result<(), Flaky> {
                calls += 1;
                Err(if calls == 4 { Flaky("last") } else { Flaky("early") })
            },
            &budget(4, 100),
        )
        .unwrap_err();

        assert_eq!(err, Flaky("last"));
        assert_eq!(calls, 4);
        assert_eq!(
            pacer.sleeps(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn single_attempt_budget_never_sleeps() {
        let pacer = VirtualPacer::new();
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff_using(
            &pacer,
            || {
                calls += 1;
                Err("nope")
            },
            &budget(1, 100),
        );
        assert_eq!(result, Err("nope"));
        assert_eq!(calls, 1);
        assert!(pacer.sleeps().is_empty());
    }

    #[test]
    fn anyhow_errors_keep_their_message() {
        let start = Instant::now();
        let mut calls = 0;
        let err = retry_with_backoff(
            || -> anyhow::Result<()> {
                calls += 1;
                Err(anyhow::anyhow!("x"))
            },
            &budget(2, 50),
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "x");
        assert_eq!(calls, 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(50 + 200));
    }
}
