//! Event transport
//!
//! Request/reply and fire-and-forget delivery of CloudEvents. The reference
//! lookup and the response sink both go through `EventTransport`, so tests can
//! swap in an in-memory implementation.

pub mod client;
pub mod event;

use async_trait::async_trait;

use crate::error::TransportError;

pub use client::HttpTransport;
pub use event::{Event, EventError};

#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    /// Send `event` to `target` and wait for the reply, if the target sent one.
    async fn request(&self, target: &str, event: Event) -> Result<Option<Event>, TransportError>;

    /// Deliver `event` to `target`, ignoring any reply.
    async fn send(&self, target: &str, event: Event) -> Result<(), TransportError>;
}
