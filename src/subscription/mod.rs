//! The `subscription` module maps topic filters to message handlers.
//!
//! - `filter`: validation and matching of `/`-separated filters with `+` and `#`.
//! - `message`: the message type handed to handlers.
//! - `registry`: the concurrent, trie-backed filter → handler table.

pub mod filter;
pub mod message;
pub mod registry;

pub use filter::{TopicFilter, validate_topic};
pub use message::Message;
pub use registry::{Handler, MatchedHandler, SubscriptionId, SubscriptionRegistry};

#[cfg(test)]
mod tests;
