//! Fixed-interval polling with an attempt bound and an optional deadline.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` polls until the operation settles or the deadline passes.
    pub max_attempts: Option<u32>,
    pub interval: Duration,
    /// Sleep before every attempt, including the first.
    pub sleep_first: bool,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub const fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            interval,
            sleep_first: false,
            deadline: None,
        }
    }

    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
            sleep_first: false,
            deadline: None,
        }
    }

    pub const fn sleeping_first(mut self) -> Self {
        self.sleep_first = true;
        self
    }

    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Outcome of a single polling attempt.
pub enum Attempt<T, E> {
    Ready(T),
    /// Not there yet; try again after the interval.
    Pending,
    /// Give up immediately.
    Fail(E),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("deadline of {deadline:?} elapsed after {attempts} attempts")]
    DeadlineElapsed { deadline: Duration, attempts: u32 },

    #[error("{0}")]
    Failed(E),
}

/// Run `op` until it reports `Ready` or `Fail`, the attempt bound is used up,
/// or the deadline passes. `op` receives the 1-based attempt number.
pub async fn poll<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let attempts = AtomicU32::new(0);

    let run = async {
        loop {
            let attempt = attempts.load(Ordering::Relaxed) + 1;
            if policy.sleep_first {
                tokio::time::sleep(policy.interval).await;
            }
            attempts.store(attempt, Ordering::Relaxed);

            match op(attempt).await {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Fail(e) => return Err(PollError::Failed(e)),
                Attempt::Pending => {}
            }

            if policy.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(PollError::Exhausted { attempts: attempt });
            }
            if !policy.sleep_first {
                tokio::time::sleep(policy.interval).await;
            }
        }
    };

    match policy.deadline {
        Some(deadline) => match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(PollError::DeadlineElapsed {
                deadline,
                attempts: attempts.load(Ordering::Relaxed),
            }),
        },
        None => run.await,
    }
}
