//! # BrokerLink
//!
//! `brokerlink` is a small publish/subscribe client for a topic-based message
//! broker. It speaks a JSON frame protocol over WebSockets, optionally wrapped
//! in mutual TLS, and dispatches incoming messages to handlers registered
//! against topic filters with `+` and `#` wildcards.
//!
//! ## Core Modules
//!
//! - `transport`: the broker `Session`, frame protocol and TLS setup.
//! - `subscription`: topic filters, messages and the subscription registry.
//! - `dispatch`: the loop that routes received messages to handlers.
//! - `client`: the `Publisher` and `Subscriber` facades.
//! - `config`: settings loaded from `config/default.toml` and the environment.
//! - `utils`: error types and logging setup.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod subscription;
pub mod transport;
pub mod utils;

pub use client::{Publisher, Subscriber};
pub use subscription::{Message, SubscriptionId, SubscriptionRegistry, TopicFilter};
pub use transport::{Endpoint, Session, SessionOptions, SessionState, TlsSettings};
pub use utils::{Error, HandlerError, Result};
