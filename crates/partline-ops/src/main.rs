use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::Msg;
use sqlx::PgPool;
use tracing::{error, info};

use partline_orchestrator::apply_tracking_update;
use partline_platform::{
    EventBus, ServiceConfig, TRACKING_CHANNEL, TrackingUpdateEvent, connect_database,
};

const TRACKING_ACTOR: &str = "courier-tracking-worker";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "partline_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let events = EventBus::connect(&config.redis_url)?;

    let mut pubsub = events.client().get_async_pubsub().await?;
    pubsub.subscribe(TRACKING_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    info!("ops worker subscribed to {TRACKING_CHANNEL}");

    loop {
        let msg = messages
            .next()
            .await
            .context("tracking stream ended unexpectedly")?;
        if let Err(err) = handle_message(&pool, &events, msg).await {
            error!("failed to process tracking update: {err:#}");
        }
    }
}

async fn handle_message(pool: &PgPool, events: &EventBus, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: TrackingUpdateEvent = serde_json::from_str(&payload)?;

    let Some(effects) = apply_tracking_update(pool, &event, TRACKING_ACTOR).await? else {
        // Unknown AWB or out-of-order courier status; already logged.
        return Ok(());
    };

    for effect in effects {
        events.emit(effect.channel, &effect.event).await;
    }

    info!(awb = %event.awb, status = %event.courier_status, "tracking update processed");
    Ok(())
}
