//! Concurrency gate in front of the chat-completion provider.
//!
//! All user-facing calls go through [`RequestGate`]. It bounds the number of
//! upstream calls in flight, retries throttled and timed-out calls with
//! backoff, and turns a failed stream into a replayed complete reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::base_llm::{next_call_sequence, ChatLLM, ChatMessage};
use super::streaming::{StreamChunk, StreamReceiver, VecStreamReceiver};
use crate::config::LlmConfig;
use crate::error::LlmError;

/// What the gate does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backoff {
    /// Throttled: `base * 2^(attempt-1)` plus jitter.
    Exponential,
    /// Timed out: `base * attempt`.
    Linear,
}

/// Delay before the attempt following `attempt` (1-based), without jitter.
fn backoff_delay(kind: Backoff, base: Duration, attempt: u32) -> Duration {
    match kind {
        Backoff::Exponential => base * 2u32.saturating_pow(attempt.saturating_sub(1)),
        Backoff::Linear => base * attempt,
    }
}

/// Bounded, retrying access to a [`ChatLLM`].
#[derive(Debug, Clone)]
pub struct RequestGate {
    llm: Arc<dyn ChatLLM>,
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    backoff_base: Duration,
    call_timeout: Duration,
    chunk_size: usize,
    jitter: bool,
}

impl RequestGate {
    pub fn new(llm: Arc<dyn ChatLLM>, max_concurrent: usize, max_attempts: u32, backoff_base: Duration, call_timeout: Duration) -> Self {
        Self {
            llm,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_attempts: max_attempts.max(1),
            backoff_base,
            call_timeout,
            chunk_size: super::base_llm::DEFAULT_STREAM_CHUNK_SIZE,
            jitter: true,
        }
    }

    /// Gate configured from the `LLM_*` settings.
    pub fn from_config(llm: Arc<dyn ChatLLM>, config: &LlmConfig, chunk_size: usize) -> Self {
        let mut gate = Self::new(
            llm,
            config.max_concurrent,
            config.max_retries,
            config.backoff_base,
            config.timeout,
        );
        gate.chunk_size = chunk_size.max(1);
        gate
    }

    /// Disable the random part of the throttling backoff.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn llm(&self) -> &Arc<dyn ChatLLM> {
        &self.llm
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, LlmError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LlmError::Parse {
                provider: self.llm.provider().to_string(),
                message: "request gate closed".to_string(),
            })
    }

    async fn sleep_before_retry(&self, kind: Backoff, attempt: u32) {
        let mut delay = backoff_delay(kind, self.backoff_base, attempt);
        if kind == Backoff::Exponential && self.jitter {
            delay += Duration::from_secs_f64(rand::thread_rng().gen::<f64>());
        }
        tokio::time::sleep(delay).await;
    }

    /// Request a complete reply.
    ///
    /// Each attempt holds a permit and runs under the call timeout. Throttling
    /// and timeouts are retried until the attempts are used up; any other
    /// error is returned at once.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let seq = next_call_sequence();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = {
                let _permit = self.acquire().await?;
                tokio::time::timeout(self.call_timeout, self.llm.complete(messages)).await
            };

            let (kind, err) = match outcome {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) if e.is_rate_limited() => {
                    log::warn!("call #{} throttled (attempt {}): {}", seq, attempt, e);
                    (Backoff::Exponential, e)
                }
                Ok(Err(e)) if e.is_timeout() => {
                    log::warn!("call #{} timed out in transport (attempt {})", seq, attempt);
                    (Backoff::Linear, e)
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    log::warn!("call #{} exceeded {:?} (attempt {})", seq, self.call_timeout, attempt);
                    (
                        Backoff::Linear,
                        LlmError::Timeout {
                            provider: self.llm.provider().to_string(),
                        },
                    )
                }
            };

            if attempt >= self.max_attempts {
                return Err(err);
            }
            self.sleep_before_retry(kind, attempt).await;
        }
    }

    /// Request a reply as a stream of text deltas.
    ///
    /// Providers that stream natively are asked first; the permit is held
    /// until the stream is dropped. If opening the stream fails, or the
    /// provider does not stream, the reply is fetched with
    /// [`RequestGate::complete`] and replayed in fixed-size chunks.
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<Box<dyn StreamReceiver>, LlmError> {
        if self.llm.supports_streaming() {
            let permit = self.acquire().await?;
            match tokio::time::timeout(self.call_timeout, self.llm.stream(messages)).await {
                Ok(Ok(inner)) => {
                    return Ok(Box::new(PermitStreamReceiver {
                        inner,
                        _permit: permit,
                    }))
                }
                Ok(Err(e)) => {
                    log::warn!("{} stream failed, falling back to complete: {}", self.llm.provider(), e);
                }
                Err(_) => {
                    log::warn!("{} stream did not open in {:?}, falling back", self.llm.provider(), self.call_timeout);
                }
            }
        }

        let full = self.complete(messages).await?;
        Ok(Box::new(VecStreamReceiver::from_text(&full, self.chunk_size)))
    }
}

/// A provider stream that keeps its gate permit until dropped.
struct PermitStreamReceiver {
    inner: Box<dyn StreamReceiver>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl StreamReceiver for PermitStreamReceiver {
    async fn next(&mut self) -> Option<StreamChunk> {
        self.inner.next().await
    }
}
