//! In-memory channel for replaying captured notification traces.
//!
//! Buffers passed to [`MemoryChannel::feed`] are delivered as notifications;
//! every command written by the session is recorded.

use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

use crate::ble::transport::{NotificationStream, ScaleChannel, SubscriptionHandle};
use crate::error::{Error, Result};

/// A [`ScaleChannel`] backed by an in-memory queue.
pub struct MemoryChannel {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
    disconnects: AtomicU64,
}

impl MemoryChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            subscribes: AtomicU64::new(0),
            unsubscribes: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
        }
    }

    /// Queue a notification buffer.
    ///
    /// Buffers fed before the session subscribes are delivered once it does.
    pub fn feed(&self, data: &[u8]) {
        if self.sender.unbounded_send(data.to_vec()).is_err() {
            trace!("Notification dropped, stream closed");
        }
    }

    /// End the notification stream, as a dropped connection would.
    pub fn close_notifications(&self) {
        self.sender.close_channel();
    }

    /// Make subsequent command writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent subscriptions fail (or succeed again).
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Commands written so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Number of subscriptions made.
    pub fn subscribe_count(&self) -> u64 {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Number of unsubscribe calls.
    pub fn unsubscribe_count(&self) -> u64 {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls.
    pub fn disconnect_count(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScaleChannel for MemoryChannel {
    async fn write_command(&self, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::WriteFailed {
                reason: "write rejected by memory channel".to_string(),
            });
        }
        self.writes.lock().push(data.to_vec());
        Ok(())
    }

    async fn subscribe_notifications(&self) -> Result<(SubscriptionHandle, NotificationStream)> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::Internal(
                "subscription rejected by memory channel".to_string(),
            ));
        }
        let receiver = self.receiver.lock().take().ok_or_else(|| {
            Error::Internal("memory channel supports a single subscription".to_string())
        })?;
        let id = self.subscribes.fetch_add(1, Ordering::SeqCst);
        let stream: NotificationStream = Box::pin(receiver);
        Ok((SubscriptionHandle::new(id), stream))
    }

    async fn unsubscribe(&self, _handle: SubscriptionHandle) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_feed_before_subscribe() {
        let channel = MemoryChannel::new();
        channel.feed(&[0x12, 0x02]);
        channel.feed(&[0x14, 0x02]);
        channel.close_notifications();

        let (_, stream) = assert_ok!(channel.subscribe_notifications().await);
        let buffers: Vec<Vec<u8>> = stream.collect().await;
        assert_eq!(buffers, vec![vec![0x12, 0x02], vec![0x14, 0x02]]);
    }

    #[tokio::test]
    async fn test_single_subscription() {
        let channel = MemoryChannel::new();
        assert!(channel.subscribe_notifications().await.is_ok());
        assert!(channel.subscribe_notifications().await.is_err());
        assert_eq!(channel.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_subscription_keeps_receiver() {
        let channel = MemoryChannel::new();
        channel.set_fail_subscribe(true);
        assert!(channel.subscribe_notifications().await.is_err());
        assert_eq!(channel.subscribe_count(), 0);

        channel.set_fail_subscribe(false);
        assert!(channel.subscribe_notifications().await.is_ok());
    }

    #[tokio::test]
    async fn test_records_writes() {
        let channel = MemoryChannel::new();
        assert_ok!(channel.write_command(&[0x01, 0x02]).await);

        channel.set_fail_writes(true);
        assert_err!(channel.write_command(&[0x03]).await);

        assert_eq!(channel.writes(), vec![vec![0x01, 0x02]]);
    }
}
