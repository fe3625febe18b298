//! Transport abstraction between the protocol core and a BLE stack.
//!
//! The core only needs to write command bytes, receive notification buffers
//! and unsubscribe again. Anything that can do that (a real peripheral, an
//! in-memory replay) can drive a [`ScaleSession`](crate::session::ScaleSession).

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// Stream of raw notification buffers from the notify characteristic.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Handle returned by a notification subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Create a handle with the given id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the handle id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A connected notify/command characteristic pair.
#[async_trait]
pub trait ScaleChannel: Send + Sync {
    /// Write a command to the command characteristic.
    async fn write_command(&self, data: &[u8]) -> Result<()>;

    /// Subscribe to the notify characteristic.
    async fn subscribe_notifications(&self) -> Result<(SubscriptionHandle, NotificationStream)>;

    /// Cancel a subscription.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;

    /// Release the underlying connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Acquires channels to a scale by hardware address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScaleConnector: Send + Sync {
    /// Connect to the scale and resolve its characteristics.
    async fn connect(&self, address: &str) -> Result<Arc<dyn ScaleChannel>>;
}
