use partline_platform::{NOTIFICATIONS_CHANNEL, NotificationEvent};

/// An effect the orchestrator wants dispatched after its transaction has
/// committed. The gateway publishes these; a failed publish is logged and
/// never fails the operation that produced it.
#[derive(Debug, Clone)]
pub struct PendingEffect {
    pub channel: &'static str,
    pub event: NotificationEvent,
}

impl PendingEffect {
    pub fn notify(event: NotificationEvent) -> Self {
        Self {
            channel: NOTIFICATIONS_CHANNEL,
            event,
        }
    }
}
