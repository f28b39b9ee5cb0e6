use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::dispatch::{DispatchHandle, DispatchLoop};
use crate::subscription::{Handler, Message, SubscriptionId, SubscriptionRegistry, TopicFilter};
use crate::transport::{Endpoint, Frame, Session, SessionOptions, generate_client_id};
use crate::utils::{Error, HandlerError, Result};

/// Subscribing side of the client.
///
/// Every inbound message goes through the subscription registry; there is no
/// implicit default handler. Register a handler on `#` to see everything.
#[derive(Debug)]
pub struct Subscriber {
    session: Session,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Mutex<Option<DispatchHandle>>,
}

impl Subscriber {
    pub fn new(endpoint: Endpoint, client_id: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            session: Session::new(endpoint, client_id, options),
            registry: Arc::new(SubscriptionRegistry::new()),
            dispatcher: Mutex::new(None),
        }
    }

    /// Same as `new` with a `subscriber-<uuid>` client id.
    pub fn with_generated_id(endpoint: Endpoint, options: SessionOptions) -> Self {
        Self::new(endpoint, generate_client_id("subscriber"), options)
    }

    /// Connects and, after a reconnect, restores the broker-side
    /// subscriptions and the dispatch loop for handlers registered earlier.
    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await?;

        if !self.registry.is_empty() {
            for filter in self.registry.filters() {
                debug!(client_id = %self.session.client_id(), "Resubscribing to {filter}");
                self.session.send(&Frame::Subscribe { topic: filter }).await?;
            }
            self.ensure_dispatching().await?;
        }
        Ok(())
    }

    /// Registers `handler` for messages matching `filter` and starts the
    /// dispatch loop if it is not running yet.
    pub async fn subscribe<F>(&self, filter: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Message) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_shared(filter, Arc::new(handler)).await
    }

    pub async fn subscribe_shared(&self, filter: &str, handler: Handler) -> Result<SubscriptionId> {
        TopicFilter::new(filter)?;
        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }

        let is_new = !self.registry.contains_filter(filter);
        let id = self.registry.add_shared(filter, handler)?;
        if is_new {
            let frame = Frame::Subscribe {
                topic: filter.to_string(),
            };
            if let Err(e) = self.session.send(&frame).await {
                self.registry.remove(filter, id);
                return Err(e);
            }
        }

        // the session can drop between the send and taking its receiver
        if let Err(e) = self.ensure_dispatching().await {
            self.registry.remove(filter, id);
            return Err(e);
        }
        info!(client_id = %self.session.client_id(), "Subscribed to {filter} ({id})");
        Ok(id)
    }

    /// Subscribes a handler that forwards every matching message into a
    /// channel owned by the caller.
    pub async fn subscribe_channel(
        &self,
        filter: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Message>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe(filter, move |msg: &Message| {
                tx.send(msg.clone())
                    .map_err(|_| HandlerError::new("message receiver was dropped"))
            })
            .await?;
        Ok((id, rx))
    }

    /// Removes one handler. The broker is told to stop sending once no
    /// handler is left for `filter`. Returns whether the handler existed.
    pub async fn unsubscribe(&self, filter: &str, id: SubscriptionId) -> Result<bool> {
        let removed = self.registry.remove(filter, id);
        if removed && !self.registry.contains_filter(filter) && self.session.is_connected() {
            let frame = Frame::Unsubscribe {
                topic: filter.to_string(),
            };
            self.session.send(&frame).await?;
            info!(client_id = %self.session.client_id(), "Unsubscribed from {filter}");
        }
        Ok(removed)
    }

    /// Disconnects and waits, up to the session's shutdown timeout, for the
    /// dispatch loop to finish.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;

        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            handle.wait(self.session.options().shutdown_timeout).await;
        }
    }

    pub async fn is_dispatching(&self) -> bool {
        self.dispatcher
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    async fn ensure_dispatching(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock().await;

        match self.session.receive() {
            Ok(incoming) => {
                // a loop still attached to a previous connection
                if let Some(stale) = dispatcher.take() {
                    stale.shutdown(self.session.options().shutdown_timeout).await;
                }
                let dispatch =
                    DispatchLoop::new(incoming, self.registry.clone(), self.session.client_id());
                *dispatcher = Some(dispatch.spawn());
                Ok(())
            }
            // this connection is already being dispatched
            Err(Error::ReceiverInUse) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
