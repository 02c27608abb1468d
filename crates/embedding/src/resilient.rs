//! Retry-with-backoff wrapper, generalized over any fallible async operation
//! so `EmbeddingProvider` and `RerankerProvider` share one policy instead of
//! each re-implementing the backoff loop.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::provider::{EmbeddingProvider, ProviderError, RerankerProvider};

#[derive(Debug, Clone)]
pub struct RetryConfig {
  pub max_retries: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
  pub backoff_multiplier: f64,
  pub add_jitter: bool,
  pub request_timeout: Duration,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_backoff: Duration::from_secs(1),
      max_backoff: Duration::from_secs(30),
      backoff_multiplier: 2.0,
      add_jitter: true,
      request_timeout: Duration::from_secs(60),
    }
  }
}

impl RetryConfig {
  pub fn for_local() -> Self {
    Self {
      max_retries: 2,
      initial_backoff: Duration::from_millis(500),
      max_backoff: Duration::from_secs(5),
      backoff_multiplier: 2.0,
      add_jitter: true,
      request_timeout: Duration::from_secs(30),
    }
  }

  pub fn for_cloud() -> Self {
    Self {
      max_retries: 5,
      initial_backoff: Duration::from_secs(1),
      max_backoff: Duration::from_secs(60),
      backoff_multiplier: 2.0,
      add_jitter: true,
      request_timeout: Duration::from_secs(120),
    }
  }

  fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
    let mut backoff = Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()));
    if self.add_jitter {
      let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
      backoff = Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
    }
    backoff.min(self.max_backoff)
  }
}

/// Run `op` up to `config.max_retries + 1` times, sleeping between attempts
/// with exponential backoff. `op` is re-invoked from scratch on each attempt
/// (no partial-progress resumption). Skips straight to returning the error
/// when it isn't retryable, or when this was the last attempt.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ProviderError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, ProviderError>>,
{
  let mut last_error = None;

  for attempt in 0..=config.max_retries {
    if attempt > 0 {
      let backoff = config.backoff_for_attempt(attempt - 1);
      debug!(attempt, ?backoff, "retrying provider call");
      tokio::time::sleep(backoff).await;
    }

    match tokio::time::timeout(config.request_timeout, op()).await {
      Ok(Ok(value)) => return Ok(value),
      Ok(Err(err)) => {
        if err.is_retryable() && attempt < config.max_retries {
          warn!(attempt = attempt + 1, error = %err, "retryable provider error");
          last_error = Some(err);
          continue;
        }
        return Err(err);
      }
      Err(_) => {
        warn!(attempt = attempt + 1, "provider call timed out");
        last_error = Some(ProviderError::Timeout);
        if attempt >= config.max_retries {
          break;
        }
      }
    }
  }

  Err(last_error.unwrap_or(ProviderError::Timeout))
}

pub struct ResilientEmbeddingProvider<P> {
  inner: P,
  config: RetryConfig,
}

impl<P: EmbeddingProvider> ResilientEmbeddingProvider<P> {
  pub fn new(inner: P) -> Self {
    Self { inner, config: RetryConfig::default() }
  }

  pub fn with_config(inner: P, config: RetryConfig) -> Self {
    Self { inner, config }
  }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for ResilientEmbeddingProvider<P> {
  fn model_version(&self) -> &str {
    self.inner.model_version()
  }

  fn dimension(&self) -> usize {
    self.inner.dimension()
  }

  async fn encode_single(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
    retry_with_backoff(&self.config, || self.inner.encode_single(text)).await
  }

  async fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
    retry_with_backoff(&self.config, || self.inner.encode(texts)).await
  }
}

pub struct ResilientRerankerProvider<P> {
  inner: P,
  config: RetryConfig,
}

impl<P: RerankerProvider> ResilientRerankerProvider<P> {
  pub fn new(inner: P) -> Self {
    Self { inner, config: RetryConfig::default() }
  }

  pub fn with_config(inner: P, config: RetryConfig) -> Self {
    Self { inner, config }
  }
}

#[async_trait]
impl<P: RerankerProvider> RerankerProvider for ResilientRerankerProvider<P> {
  async fn rerank(&self, search: &str, task: &str, documents: &[&str]) -> Result<Vec<f32>, ProviderError> {
    retry_with_backoff(&self.config, || self.inner.rerank(search, task, documents)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_config(max_retries: u32) -> RetryConfig {
    RetryConfig {
      max_retries,
      initial_backoff: Duration::from_millis(1),
      max_backoff: Duration::from_millis(5),
      backoff_multiplier: 2.0,
      add_jitter: false,
      request_timeout: Duration::from_millis(50),
    }
  }

  #[tokio::test]
  async fn succeeds_without_retry_on_first_try() {
    let calls = AtomicU32::new(0);
    let result = retry_with_backoff(&fast_config(3), || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Ok::<_, ProviderError>(42) }
    })
    .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn retries_transient_error_then_succeeds() {
    let calls = AtomicU32::new(0);
    let result = retry_with_backoff(&fast_config(3), || {
      let attempt = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if attempt < 2 {
          Err(ProviderError::Network("reset".into()))
        } else {
          Ok(7)
        }
      }
    })
    .await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn gives_up_after_exhausting_retries() {
    let calls = AtomicU32::new(0);
    let result = retry_with_backoff(&fast_config(2), || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err::<i32, _>(ProviderError::Timeout) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn non_retryable_error_short_circuits() {
    let calls = AtomicU32::new(0);
    let result = retry_with_backoff(&fast_config(3), || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err::<i32, _>(ProviderError::InvalidInput("bad".into())) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
