//! `strider-middleware` – The Nervous System
//!
//! Routes data between the robot link, the state machine and local
//! observers without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`transport`] – [`ControlTransport`]: the publish / request / subscribe
//!   contract an external real-time link must provide.
//! - [`loopback`] – [`LoopbackTransport`]: in-memory transport for tests and
//!   dry runs.
//! - [`state_feed`] – [`StateFeed`]: decodes robot state reports and records
//!   them in the shared state machine.

pub mod bus;
pub mod loopback;
pub mod state_feed;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use loopback::LoopbackTransport;
pub use state_feed::{StateFeed, StateReport};
pub use transport::{ControlTransport, Subscription, SubscriptionId, channel};
