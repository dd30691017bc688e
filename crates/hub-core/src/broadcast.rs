//! Event fan-out to subscribed connections.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::event::EventEnvelope;
use crate::registry::{ConnectionRegistry, DeliveryReport};
use crate::topic::Topic;

/// Publishes events to every connection subscribed to a topic.
///
/// Fire-and-forget: a slow or dead subscriber never blocks the caller, and
/// delivery failures are logged rather than returned.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `payload` once and publish it under `topic`.
    pub fn publish<T: Serialize>(&self, topic: Topic, payload: &T) -> DeliveryReport {
        let params = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(%topic, error = %e, "failed to serialize event payload");
                return DeliveryReport::default();
            }
        };
        let envelope = EventEnvelope::new(topic, params);
        let frame: Arc<str> = match serde_json::to_string(&envelope) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(%topic, error = %e, "failed to serialize event envelope");
                return DeliveryReport::default();
            }
        };

        let report = self.registry.publish(topic, &frame);
        if report.failed > 0 {
            warn!(%topic, failed = report.failed, delivered = report.delivered, "partial event delivery");
        }
        report
    }

    /// The registry this broadcaster publishes through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn publish_sends_event_envelope_to_subscribers() {
        let reg = Arc::new(ConnectionRegistry::new(8));
        let (c1, mut rx1) = reg.register();
        let (_c2, mut rx2) = reg.register();
        let _ = reg.subscribe(c1.id(), Topic::DataCreated).unwrap();

        let bc = Broadcaster::new(Arc::clone(&reg));
        let report = bc.publish(Topic::DataCreated, &json!({"id": "abc"}));
        assert_eq!(report.delivered, 1);

        let msg: Value = serde_json::from_str(&rx1.try_recv().unwrap()).unwrap();
        assert_eq!(msg, json!({"method": "data.created", "params": {"id": "abc"}}));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let reg = Arc::new(ConnectionRegistry::new(8));
        let bc = Broadcaster::new(reg);
        let report = bc.publish(Topic::SystemNotice, &json!({"message": "hi"}));
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn publish_to_dead_subscriber_does_not_error() {
        let reg = Arc::new(ConnectionRegistry::new(8));
        let (c1, rx1) = reg.register();
        let _ = reg.subscribe(c1.id(), Topic::DataDeleted).unwrap();
        drop(rx1);

        let bc = Broadcaster::new(reg);
        let report = bc.publish(Topic::DataDeleted, &json!({"id": "gone"}));
        assert_eq!(report, DeliveryReport { delivered: 0, failed: 1 });
    }

    #[test]
    fn payload_serialization_failure_is_swallowed() {
        use std::collections::HashMap;

        let reg = Arc::new(ConnectionRegistry::new(8));
        let (c1, mut rx1) = reg.register();
        let _ = reg.subscribe(c1.id(), Topic::DataUpdated).unwrap();

        // Non-string map keys cannot be represented in JSON.
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        let _ = bad.insert((1, 2), 3);

        let report = Broadcaster::new(reg).publish(Topic::DataUpdated, &bad);
        assert_eq!(report, DeliveryReport::default());
        assert!(rx1.try_recv().is_err());
    }
}
