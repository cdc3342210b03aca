//! Bounded exponential-backoff retry.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{RequestError, TransportError};
use crate::request::{Response, is_transient_status};

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts including the first one.
  pub max_attempts: u32,
  /// Delay before the second attempt; doubles for every further attempt.
  pub base_delay: Duration,
  /// Upper bound for any single delay.
  pub max_delay: Duration,
  /// Random extra delay drawn from `0..=max_jitter`.
  pub max_jitter: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 4,
      base_delay: Duration::from_millis(300),
      max_delay: Duration::from_millis(5000),
      max_jitter: Duration::from_millis(200),
    }
  }
}

impl RetryPolicy {
  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = max_attempts.max(1);
    self
  }

  pub fn without_jitter(mut self) -> Self {
    self.max_jitter = Duration::ZERO;
    self
  }

  /// Delay before 1-indexed `attempt`:
  /// `min(max_delay, base_delay * 2^(attempt-2) + jitter)`, zero for the first.
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    if attempt <= 1 {
      return Duration::ZERO;
    }

    let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
    let backoff = self.base_delay.saturating_mul(factor);
    backoff.saturating_add(self.jitter()).min(self.max_delay)
  }

  fn jitter(&self) -> Duration {
    let max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
    if max == 0 {
      return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max))
  }
}

/// Run `operation` until it yields a non-transient outcome or attempts run out.
///
/// `operation` receives the 1-indexed attempt number. Responses with status
/// 429 or 5xx and transient transport errors are retried. Any other response
/// (including 4xx) is returned as is, and non-transient errors propagate
/// immediately. When attempts are exhausted the last failure is returned, a
/// transient status becoming [`RequestError::Remote`].
///
/// Cancellation is checked before every attempt and preempts backoff waits.
pub async fn with_retry<F, Fut>(
  policy: &RetryPolicy,
  cancel: &CancellationToken,
  mut operation: F,
) -> Result<Response, RequestError>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<Response, TransportError>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 1;

  loop {
    if cancel.is_cancelled() {
      return Err(TransportError::Cancelled.into());
    }

    let failure = match operation(attempt).await {
      Ok(response) if !is_transient_status(response.status) => return Ok(response),
      Ok(response) => RequestError::remote(response.status, response.body),
      Err(e) if !e.is_transient() => return Err(e.into()),
      Err(e) => RequestError::Transport(e),
    };

    if attempt >= max_attempts {
      warn!(attempts = attempt, error = %failure, "retries exhausted");
      return Err(failure);
    }

    attempt += 1;
    let delay = policy.delay_for_attempt(attempt);
    warn!(
      attempt,
      max_attempts,
      delay_ms = delay.as_millis() as u64,
      error = %failure,
      "transient failure, backing off"
    );

    tokio::select! {
      _ = cancel.cancelled() => return Err(TransportError::Cancelled.into()),
      _ = tokio::time::sleep(delay) => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn test_default_schedule() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.base_delay, Duration::from_millis(300));
    assert_eq!(policy.max_delay, Duration::from_millis(5000));
    assert_eq!(policy.max_jitter, Duration::from_millis(200));
  }

  #[test]
  fn test_delay_schedule_without_jitter() {
    let policy = RetryPolicy::default().without_jitter();
    assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(600));
    assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1200));
    assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(4800));
    assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(5000));
    assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(5000));
  }

  #[test]
  fn test_jitter_stays_in_bounds() {
    let policy = RetryPolicy::default();
    for _ in 0..100 {
      let delay = policy.delay_for_attempt(2);
      assert!(delay >= Duration::from_millis(300));
      assert!(delay <= Duration::from_millis(500));
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_succeeds_after_transient_statuses() {
    let calls = Arc::new(AtomicU32::new(0));
    let statuses = [500u16, 500, 200];
    let start = tokio::time::Instant::now();

    let counter = calls.clone();
    let response = with_retry(&RetryPolicy::default(), &CancellationToken::new(), |attempt| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(statuses[(attempt - 1) as usize], serde_json::Value::Null))
      }
    })
    .await
    .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_millis(900));
  }

  #[tokio::test(start_paused = true)]
  async fn test_not_found_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let response = with_retry(&RetryPolicy::default(), &CancellationToken::new(), |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(404, serde_json::Value::Null))
      }
    })
    .await
    .unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhaustion_returns_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let err = with_retry(&RetryPolicy::default(), &CancellationToken::new(), |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(503, serde_json::json!("busy")))
      }
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(err, RequestError::remote(503, serde_json::json!("busy")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_network_failures_but_not_invalid_requests() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result = with_retry(&RetryPolicy::default(), &CancellationToken::new(), |attempt| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        if attempt == 1 {
          Err(TransportError::Timeout { timeout_ms: 10 })
        } else {
          Ok(Response::new(204, serde_json::Value::Null))
        }
      }
    })
    .await;
    assert_eq!(result.unwrap().status, 204);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let err = with_retry(&RetryPolicy::default(), &CancellationToken::new(), |_| async {
      Err(TransportError::InvalidRequest {
        message: "bad".into(),
      })
    })
    .await
    .unwrap_err();
    assert!(!err.is_transient());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_preempts_backoff() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let task = tokio::spawn(async move {
      with_retry(&RetryPolicy::default(), &cancel, |_| {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Ok(Response::new(500, serde_json::Value::Null))
        }
      })
      .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    trigger.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_already_cancelled_never_calls() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = with_retry(&RetryPolicy::default(), &cancel, |_| async {
      Ok(Response::new(200, serde_json::Value::Null))
    })
    .await
    .unwrap_err();
    assert!(err.is_cancelled());
  }
}
