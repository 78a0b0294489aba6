//! Typed broadcast bus carrying engine notifications.
//!
//! Producers hold the raw [`tokio::sync::broadcast::Sender`] and emit
//! fire-and-forget; consumers subscribe here. A slow subscriber lags and
//! drops the oldest notifications instead of blocking any emitter.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use webhelm_core_types::EngineError;

/// Marker for payload types the bus can carry.
pub trait Notification: Clone + Send + Sync + Debug + 'static {}

impl<T> Notification for T where T: Clone + Send + Sync + Debug + 'static {}

/// Publish/subscribe seam between the pool and its observers.
#[async_trait]
pub trait NotificationBus<N: Notification>: Send + Sync {
    async fn publish(&self, notification: N) -> Result<(), EngineError>;
    fn subscribe(&self) -> broadcast::Receiver<N>;
}

/// Broadcast-backed bus wired into the engine facade and the test suites.
pub struct BroadcastBus<N: Notification> {
    channel: broadcast::Sender<N>,
}

impl<N: Notification> BroadcastBus<N> {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (channel, _) = broadcast::channel(capacity);
        Arc::new(Self { channel })
    }

    /// Raw sender for producers that emit without going through the trait.
    pub fn sender(&self) -> broadcast::Sender<N> {
        self.channel.clone()
    }
}

#[async_trait]
impl<N: Notification> NotificationBus<N> for BroadcastBus<N> {
    async fn publish(&self, notification: N) -> Result<(), EngineError> {
        match self.channel.send(notification) {
            Ok(_) => Ok(()),
            Err(err) => Err(EngineError::internal(err.to_string())),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<N> {
        self.channel.subscribe()
    }
}

/// Bridge a subscription into an mpsc receiver, for callers that want a
/// plain `recv().await` without broadcast lag handling.
pub fn bridge_to_mpsc<N: Notification>(
    bus: Arc<BroadcastBus<N>>,
    capacity: usize,
) -> mpsc::Receiver<N> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mut feed = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(item) = feed.recv().await {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    rx
}
