/// A message delivered to or published by a client.
///
/// The topic is always concrete (no wildcards). The payload is an opaque byte
/// sequence; `timestamp` is the publisher's wall clock in milliseconds since
/// the Unix epoch.
///
/// # Example
///
/// ```rust
/// use brokerlink::Message;
///
/// let msg = Message::new("sensors/kitchen/temp", "21.5");
/// assert_eq!(msg.payload_str(), Some("21.5"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: i64,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
