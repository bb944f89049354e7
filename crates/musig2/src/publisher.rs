//! The seam to the P2P layer for outgoing advertisements.

use async_trait::async_trait;
use concord_discovery::Advertisement;
use thiserror::Error;

/// The transport refused or failed to send an advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to publish advertisement: {0}")]
pub struct PublishError(pub String);

/// Sends advertisements to the network (gossip topic, DHT record, ...).
///
/// Retries with backoff are the implementor's concern.
#[async_trait]
pub trait AdvertisementPublisher: Send + Sync {
    /// Publishes `advertisement`.
    async fn publish(&self, advertisement: &Advertisement) -> Result<(), PublishError>;
}
