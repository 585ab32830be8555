//! Ordered try-until-success iteration
//!
//! Chat providers and speech engines share the same failover semantics:
//! candidates are tried in order, each under a timeout, and the first success
//! wins. A failure of one candidate is logged and absorbed. Caller errors
//! stop the iteration since no other candidate would accept the input.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::Error;
use crate::providers::Selection;

/// Something that can be tried and named in logs
pub trait Candidate: Clone {
    fn label(&self) -> &str;
}

impl Candidate for String {
    fn label(&self) -> &str {
        self
    }
}

impl Candidate for Selection {
    fn label(&self) -> &str {
        &self.provider
    }
}

/// Outcome of one attempt, handed to the recorder
#[derive(Debug)]
pub struct Attempt<'a> {
    pub latency: Duration,
    pub error: Option<&'a Error>,
}

impl Attempt<'_> {
    /// Latency in whole milliseconds
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis().min(u128::from(u64::MAX)) as u64
    }
}

/// A candidate that failed
#[derive(Debug)]
pub struct Failure {
    pub candidate: String,
    pub error: Error,
}

/// Every candidate failed, or a caller error stopped the iteration
#[derive(Debug, Default)]
pub struct Exhausted {
    pub failures: Vec<Failure>,
}

impl Exhausted {
    /// Convert into the error surfaced to the caller
    ///
    /// A caller error is returned unchanged; anything else becomes the error
    /// built by `on_exhausted` from the attempt count.
    pub fn into_error(self, on_exhausted: impl FnOnce(usize) -> Error) -> Error {
        let attempts = self.failures.len();
        match self.failures.into_iter().last() {
            Some(f) if f.error.is_caller_error() => f.error,
            _ => on_exhausted(attempts),
        }
    }
}

/// Try `candidates` in order until one succeeds
///
/// Each call runs under `timeout`; a timeout counts as a failure of that
/// candidate. `on_attempt` sees every attempt, including the ones hidden by
/// a later success.
///
/// # Errors
///
/// Returns [`Exhausted`] with one entry per failed attempt
pub async fn first_success<C, T, F, Fut, R>(
    candidates: Vec<C>,
    timeout: Duration,
    mut call: F,
    mut on_attempt: R,
) -> Result<(C, T), Exhausted>
where
    C: Candidate,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = crate::Result<T>>,
    R: FnMut(&C, &Attempt<'_>),
{
    let mut exhausted = Exhausted::default();

    for candidate in candidates {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, call(candidate.clone())).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        };
        let latency = started.elapsed();

        match result {
            Ok(value) => {
                on_attempt(
                    &candidate,
                    &Attempt {
                        latency,
                        error: None,
                    },
                );
                if !exhausted.failures.is_empty() {
                    tracing::info!(
                        candidate = candidate.label(),
                        failed_attempts = exhausted.failures.len(),
                        "fallback candidate succeeded"
                    );
                }
                return Ok((candidate, value));
            }
            Err(error) => {
                on_attempt(
                    &candidate,
                    &Attempt {
                        latency,
                        error: Some(&error),
                    },
                );
                let stop = error.is_caller_error();
                tracing::warn!(
                    candidate = candidate.label(),
                    error = %error,
                    "candidate failed, trying next"
                );
                exhausted.failures.push(Failure {
                    candidate: candidate.label().to_string(),
                    error,
                });
                if stop {
                    break;
                }
            }
        }
    }

    Err(exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let mut seen = Vec::new();
        let (winner, value) = first_success(
            names(&["a", "b", "c"]),
            Duration::from_secs(1),
            |c| async move {
                if c == "a" {
                    Err(Error::Chat("down".into()))
                } else {
                    Ok(c.len())
                }
            },
            |c, attempt| seen.push((c.clone(), attempt.error.is_some())),
        )
        .await
        .unwrap();

        assert_eq!(winner, "b");
        assert_eq!(value, 1);
        assert_eq!(
            seen,
            vec![("a".to_string(), true), ("b".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_all_fail() {
        let result: Result<(String, ()), _> = first_success(
            names(&["a", "b"]),
            Duration::from_secs(1),
            |_| async { Err(Error::Chat("down".into())) },
            |_, _| {},
        )
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.failures.len(), 2);
        let err = exhausted.into_error(|attempts| Error::AllProvidersExhausted {
            task: "chat".into(),
            attempts,
        });
        assert_eq!(err.kind(), "all_providers_exhausted");
    }

    #[tokio::test]
    async fn test_timeout_falls_through() {
        let (winner, ()) = first_success(
            names(&["slow", "fast"]),
            Duration::from_millis(20),
            |c| async move {
                if c == "slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(())
            },
            |_, _| {},
        )
        .await
        .unwrap();
        assert_eq!(winner, "fast");
    }

    #[tokio::test]
    async fn test_caller_error_stops() {
        let mut calls = 0;
        let result: Result<(String, ()), _> = first_success(
            names(&["a", "b"]),
            Duration::from_secs(1),
            |_| {
                calls += 1;
                async { Err(Error::InvalidAudioFormat("odd length".into())) }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(calls, 1);
        let err = result
            .unwrap_err()
            .into_error(|_| Error::EngineUnavailable("none".into()));
        assert_eq!(err.kind(), "invalid_audio_format");
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let result: Result<(String, ()), _> =
            first_success(Vec::new(), Duration::from_secs(1), |_| async { Ok(()) }, |_, _| {}).await;
        assert!(result.unwrap_err().failures.is_empty());
    }
}
