//! Run several fallible lookups at once and keep the first one that succeeds.

use std::fmt;
use std::future::Future;

use futures::StreamExt;
use futures::stream::FuturesUnordered;

/// Every attempt of a [`first_success`] race failed.
///
/// Errors are kept in completion order.
#[derive(Debug)]
pub struct AggregateError<E> {
    errors: Vec<E>,
}

impl<E> AggregateError<E> {
    /// The individual failures, in the order they completed
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// Take ownership of the individual failures
    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    /// Number of failed attempts
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when the race had no attempts at all
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for AggregateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} attempts failed", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "{}{e}", if i == 0 { ": " } else { "; " })?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AggregateError<E> {}

/// Drive all `attempts` concurrently and return the first `Ok`.
///
/// Attempts still pending when a winner resolves are dropped, which cancels
/// them. If every attempt fails the result carries all of their errors. An
/// empty input fails immediately with an empty aggregate.
pub async fn first_success<I, F, T, E>(attempts: I) -> Result<T, AggregateError<E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<F> = attempts.into_iter().collect();
    let mut errors = Vec::with_capacity(pending.len());
    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(e) => errors.push(e),
        }
    }
    Err(AggregateError { errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    async fn after<T>(ms: u64, value: T) -> T {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        value
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_beats_fast_failures() {
        let attempts: Vec<futures::future::BoxFuture<'static, Result<&str, &str>>> = vec![
            Box::pin(after(10, Err("fast failure a"))),
            Box::pin(after(50, Ok("X"))),
            Box::pin(after(10, Err("fast failure b"))),
        ];
        assert_eq!(first_success(attempts).await.unwrap(), "X");
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_are_aggregated() {
        let attempts = vec![
            after(30, Err::<(), _>("third")),
            after(10, Err("first")),
            after(20, Err("second")),
        ];
        let err = first_success(attempts).await.unwrap_err();
        assert_eq!(err.len(), 3);
        assert_eq!(err.errors(), &["first", "second", "third"]);
        assert_eq!(
            err.to_string(),
            "all 3 attempts failed: first; second; third"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn losers_are_dropped_after_a_win() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let slow = async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ()>(2)
        };
        let attempts: Vec<futures::future::BoxFuture<'static, Result<i32, ()>>> =
            vec![Box::pin(after(1, Ok(1))), Box::pin(slow)];
        assert_eq!(first_success(attempts).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_race_fails() {
        let attempts: Vec<std::future::Ready<Result<(), ()>>> = Vec::new();
        assert!(first_success(attempts).await.unwrap_err().is_empty());
    }
}
