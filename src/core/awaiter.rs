//! Waiting for the external system to finish rendering its response
//!
//! The observer pushes change notifications; nothing here polls the
//! surface on its own. Once the response count has grown past the baseline
//! the text must stay unchanged for a number of spaced checks before the
//! response counts as complete, which absorbs streamed rendering.

use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::collaborators::ResponseObserver;
use crate::core::config::AwaitConfig;
use crate::core::error::WorkflowError;

/// How the wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    /// A new response stopped changing
    Stable(String),
    /// A new response appeared but was still changing when time ran out
    Unsettled(String),
}

impl AwaitOutcome {
    pub fn text(&self) -> &str {
        match self {
            AwaitOutcome::Stable(text) | AwaitOutcome::Unsettled(text) => text,
        }
    }
}

/// Resolves once `cancel` carries `true`. Never resolves if the sender is
/// gone without cancelling.
pub async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Debounce state for one wait
struct Stabilizer {
    required: u32,
    interval: Duration,
    last_text: Option<String>,
    last_check: Option<Instant>,
    stable_checks: u32,
}

impl Stabilizer {
    fn new(config: &AwaitConfig) -> Self {
        Stabilizer {
            required: config.stability_checks,
            interval: config.stability_interval(),
            last_text: None,
            last_check: None,
            stable_checks: 0,
        }
    }

    /// Feed the current text; true once it has been stable long enough.
    fn observe(&mut self, text: String, now: Instant) -> bool {
        let unchanged = !text.is_empty() && self.last_text.as_deref() == Some(text.as_str());
        if !unchanged {
            self.stable_checks = 0;
            self.last_text = Some(text);
            self.last_check = Some(now);
            return false;
        }

        let spaced = self
            .last_check
            .map_or(true, |at| now.duration_since(at) >= self.interval);
        if spaced {
            self.stable_checks += 1;
            self.last_check = Some(now);
            debug!(
                "⏳ [Await] Stability check {}/{}",
                self.stable_checks, self.required
            );
        }
        self.stable_checks >= self.required
    }
}

/// Wait for a response beyond `baseline` to appear and settle.
pub async fn await_response(
    observer: &dyn ResponseObserver,
    baseline: usize,
    config: &AwaitConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<AwaitOutcome, WorkflowError> {
    let notify = Arc::new(Notify::new());
    let _subscription = {
        let notify = notify.clone();
        observer.subscribe(Box::new(move || notify.notify_one()))
    };

    let deadline = Instant::now() + config.timeout();
    let mut stabilizer = Stabilizer::new(config);
    let mut seen_new = false;

    loop {
        let count = observer.count_responses();
        if count > baseline {
            if !seen_new {
                info!(
                    "📨 [Await] New response detected ({} -> {})",
                    baseline, count
                );
                seen_new = true;
            }
            if stabilizer.observe(observer.latest_response_text(), Instant::now()) {
                info!("✅ [Await] Response stabilized");
                return Ok(AwaitOutcome::Stable(observer.latest_response_text()));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            if seen_new {
                warn!("⏱️  [Await] Timed out before the response settled, reverting latest text");
                return Ok(AwaitOutcome::Unsettled(observer.latest_response_text()));
            }
            warn!("⏱️  [Await] No new response within {}ms", config.timeout_ms);
            return Err(WorkflowError::ResponseTimeout {
                timeout_ms: config.timeout_ms,
            });
        }

        // Before anything arrives only a push (or the deadline) wakes us;
        // afterwards the spaced stability checks need a timer as well.
        let remaining = deadline - now;
        let nap = if seen_new {
            stabilizer.interval.min(remaining)
        } else {
            remaining
        };

        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(nap) => {}
            _ = cancellation(cancel) => {
                info!("🛑 [Await] Cancelled while waiting for a response");
                return Err(WorkflowError::Cancelled);
            }
        }
    }
}
