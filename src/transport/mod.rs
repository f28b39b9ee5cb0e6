//! The `transport` module is responsible for network communication with the
//! broker over WebSockets.
//!
//! It defines the frame protocol spoken with the broker, the mutual TLS
//! setup, and the `Session` that owns a single broker connection.

pub mod message;
pub mod session;
pub mod tls;

pub use message::Frame;
pub use session::{Endpoint, Incoming, Session, SessionOptions, SessionState, generate_client_id};
pub use tls::TlsSettings;

#[cfg(test)]
mod tests;
