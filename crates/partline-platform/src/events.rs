use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::error;

/// Fire-and-forget publisher for notification and tracking events.
/// Emission failure must never fail the operation it describes, so
/// `emit` logs and swallows instead of returning an error.
#[derive(Clone)]
pub struct EventBus {
    client: Client,
}

impl EventBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Raw client handle for subscribers (the tracking worker's pubsub).
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn emit<T: Serialize>(&self, channel: &str, event: &T) {
        if let Err(err) = self.publish(channel, event).await {
            error!(channel, "failed to publish event: {err}");
        }
    }

    async fn publish<T: Serialize>(&self, channel: &str, event: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        let _: i64 = connection.publish(channel, payload).await?;
        Ok(())
    }
}
