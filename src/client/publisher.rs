use tracing::info;

use crate::subscription::{Message, validate_topic};
use crate::transport::{
    Endpoint, Frame, Session, SessionOptions, SessionState, generate_client_id,
};
use crate::utils::{Error, Result};

/// Publishing side of the client. Sends are fire-and-forget: nothing is
/// acknowledged, so delivery is at most once.
#[derive(Debug)]
pub struct Publisher {
    session: Session,
}

impl Publisher {
    pub fn new(endpoint: Endpoint, client_id: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            session: Session::new(endpoint, client_id, options),
        }
    }

    /// Same as `new` with a `publisher-<uuid>` client id.
    pub fn with_generated_id(endpoint: Endpoint, options: SessionOptions) -> Self {
        Self::new(endpoint, generate_client_id("publisher"), options)
    }

    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await
    }

    /// Publishes `payload` to `topic` on the caller's task.
    ///
    /// Fails with `InvalidTopic` for empty or wildcard topics and with
    /// `NotConnected` (without writing anything) unless connected.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        validate_topic(topic)?;
        if self.session.state() != SessionState::Connected {
            return Err(Error::NotConnected);
        }

        let message = Message::new(topic, payload);
        let size = message.payload.len();
        self.session.send(&Frame::publish(message)).await?;
        info!(client_id = %self.session.client_id(), "Published {size} bytes to {topic}");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}
