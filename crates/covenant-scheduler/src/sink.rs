use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::SinkError;
use crate::types::FulfillmentEvent;

/// Receives fulfillment events. Delivery and notification happen behind
/// this boundary; the scheduler reports failures but never retries.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &FulfillmentEvent) -> Result<(), SinkError>;
}

/// Forwards events to a bounded mpsc channel.
///
/// `try_send` never blocks the tick; a full or closed channel is reported
/// as a failed emit.
pub struct ChannelSink {
    tx: mpsc::Sender<FulfillmentEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<FulfillmentEvent>) -> Self {
        Self { tx }
    }

    /// Build a sink together with the receiving end of a `capacity` channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FulfillmentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: &FulfillmentEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Writes each event to the log and nothing else.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: &FulfillmentEvent) -> Result<(), SinkError> {
        info!(
            subscription_id = %event.subscription_id,
            user_id = %event.user_id,
            vendor_id = %event.vendor_id,
            item_id = %event.item_id,
            fired_at = %event.fired_at,
            "fulfillment due"
        );
        Ok(())
    }
}
