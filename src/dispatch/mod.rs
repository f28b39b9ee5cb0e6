//! The `dispatch` module routes inbound messages to registered handlers.
//!
//! A `DispatchLoop` drains one connection's `Incoming` frames on its own
//! task. For every `message` frame it looks up the matching handlers and
//! calls them one after another, in registration order. A failing or
//! panicking handler is logged and skipped; it never stops the loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::subscription::{Message, SubscriptionRegistry};
use crate::transport::Incoming;
use crate::utils::HandlerError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// `message` frames received.
    pub messages: u64,
    /// Handler invocations.
    pub deliveries: u64,
    /// Invocations that returned an error or panicked.
    pub failures: u64,
}

pub struct DispatchLoop {
    incoming: Incoming,
    registry: Arc<SubscriptionRegistry>,
    client_id: String,
}

impl DispatchLoop {
    pub fn new(
        incoming: Incoming,
        registry: Arc<SubscriptionRegistry>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            incoming,
            registry,
            client_id: client_id.into(),
        }
    }

    /// Runs the loop on a new task.
    pub fn spawn(self) -> DispatchHandle {
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(cancel_rx));
        DispatchHandle { task, cancel }
    }

    /// Delivers messages until the frame sequence ends or `cancel` flips to
    /// `true`.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        info!(client_id = %self.client_id, "Dispatch loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    debug!(client_id = %self.client_id, "Dispatch loop cancelled");
                    break;
                }
                frame = self.incoming.next() => frame,
            };
            let Some(frame) = next else {
                break;
            };

            let kind = frame.kind();
            match frame.into_message() {
                Some(message) => deliver(&self.registry, &message, &mut stats),
                None => debug!(client_id = %self.client_id, "Ignoring {kind} frame"),
            }
        }

        info!(
            client_id = %self.client_id,
            "Dispatch loop finished after {} messages ({} handler failures)",
            stats.messages,
            stats.failures
        );
        stats
    }
}

/// Calls every handler matching `message.topic`, in registration order.
pub fn deliver(registry: &SubscriptionRegistry, message: &Message, stats: &mut DispatchStats) {
    stats.messages += 1;

    let handlers = registry.matches(&message.topic);
    if handlers.is_empty() {
        debug!("No handler registered for {}", message.topic);
        return;
    }

    for matched in handlers {
        stats.deliveries += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (matched.handler)(message)));
        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(payload) => HandlerError::new(panic_message(&*payload)),
        };

        stats.failures += 1;
        error!(
            topic = %message.topic,
            subscription = %matched.id,
            filter = %matched.filter,
            "{failure}"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// Supervises a spawned dispatch loop. Dropping the handle stops the loop.
#[derive(Debug)]
pub struct DispatchHandle {
    task: JoinHandle<DispatchStats>,
    cancel: watch::Sender<bool>,
}

impl DispatchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the loop to end on its own (the session disconnecting).
    /// Returns `None` if the task panicked or was aborted.
    pub async fn join(self) -> Option<DispatchStats> {
        match self.task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Dispatch task failed: {e}");
                None
            }
        }
    }

    /// Waits up to `limit` for the loop to end, aborting it after that.
    pub async fn wait(mut self, limit: Duration) -> Option<DispatchStats> {
        match timeout(limit, &mut self.task).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!("Dispatch task failed: {e}");
                None
            }
            Err(_) => {
                warn!("Dispatch loop did not stop within {limit:?}, aborting");
                self.task.abort();
                None
            }
        }
    }

    /// Signals the loop to stop, then waits as [`wait`](Self::wait) does.
    pub async fn shutdown(self, limit: Duration) -> Option<DispatchStats> {
        let _ = self.cancel.send(true);
        self.wait(limit).await
    }
}
