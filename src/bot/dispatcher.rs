//! Long-poll loop.
//!
//! Updates are fetched with `getUpdates` and each one is handled on its own
//! task, so a slow answer never holds up other chats. Poll failures back off
//! (honouring `retry_after`) and shutdown waits a bounded time for handlers
//! still running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::Instrument;

use super::handlers::handle_update;
use super::BotContext;
use crate::error::TelegramError;

const MAX_POLL_BACKOFF_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Delay before the next poll after `failures` consecutive poll errors.
pub fn poll_backoff(error: &TelegramError, failures: u32) -> Duration {
    if let TelegramError::Api {
        retry_after: Some(secs), ..
    } = error
    {
        return Duration::from_secs(*secs);
    }
    let exp = failures.saturating_sub(1).min(5);
    Duration::from_secs((1u64 << exp).min(MAX_POLL_BACKOFF_SECS))
}

pub struct Dispatcher {
    ctx: Arc<BotContext>,
    shutdown_grace: Duration,
}

impl Dispatcher {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self {
            ctx,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long running handlers get to finish once shutdown starts.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Poll and dispatch until `shutdown` resolves. Returns the number of
    /// updates dispatched.
    pub async fn run_until<F>(self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let timeout = self.ctx.config.schedule.poll_timeout_secs;
        let mut tasks = JoinSet::new();
        let mut offset = 0i64;
        let mut failures = 0u32;
        let mut dispatched = 0u64;

        tracing::info!("polling for updates");
        loop {
            while let Some(done) = tasks.try_join_next() {
                if let Err(e) = done {
                    tracing::error!(error = %e, "update task panicked");
                }
            }

            let polled = tokio::select! {
                _ = &mut shutdown => break,
                polled = self.ctx.api.get_updates(offset, timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        dispatched += 1;
                        let ctx = Arc::clone(&self.ctx);
                        let span = tracing::info_span!("update", update_id = update.update_id);
                        tasks.spawn(
                            async move {
                                if let Err(e) = handle_update(&ctx, update).await {
                                    tracing::warn!(error = %e, "update handling failed");
                                }
                            }
                            .instrument(span),
                        );
                    }
                }
                Err(e) => {
                    failures += 1;
                    let delay = poll_backoff(&e, failures);
                    tracing::warn!(error = %e, failures, delay_secs = delay.as_secs(), "getUpdates failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!(running = tasks.len(), "shutting down dispatcher");
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "aborting unfinished handlers");
            tasks.abort_all();
        }
        dispatched
    }
}
