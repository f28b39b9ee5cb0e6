//! The `client` module holds the two role-specific facades built on a
//! transport `Session`.
//!
//! - `Publisher` sends messages and awaits no acknowledgement.
//! - `Subscriber` combines a session, a subscription registry and a
//!   dispatch loop running on its own task.

pub mod publisher;
pub mod subscriber;

pub use publisher::Publisher;
pub use subscriber::Subscriber;
