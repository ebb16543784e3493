//! MQTT sink
//!
//! Publishes monitor output for downstream consumers:
//! - babysphere/records - Aggregated sensor records (QoS 1)
//! - babysphere/events - Posture notifications (QoS 0)
//!
//! Delivery only enqueues into the client's bounded request queue; the event
//! loop task owns the connection and reconnects on its own. While the broker
//! is unreachable the queue fills and further events fail fast instead of
//! waiting for space.

use crate::domain::types::MonitorEvent;
use crate::infra::config::MqttSinkConfig;
use crate::services::dispatcher::{Sink, SinkError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Publishes buffered while the broker is unreachable
const REQUEST_QUEUE_CAPACITY: usize = 100;

pub struct MqttSink {
    client: AsyncClient,
    records_topic: String,
    events_topic: String,
}

impl MqttSink {
    /// Create the sink and the event loop that must be driven by `run_event_loop`
    pub fn new(config: &MqttSinkConfig, site_id: &str) -> (Self, EventLoop) {
        let client_id = format!("{}-monitor-{}", site_id, std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, &config.host, config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, REQUEST_QUEUE_CAPACITY);
        let sink = Self {
            client,
            records_topic: config.records_topic.clone(),
            events_topic: config.events_topic.clone(),
        };
        (sink, eventloop)
    }

    fn route(&self, event: &MonitorEvent) -> (&str, QoS) {
        match event {
            // At-least-once for records, fire-and-forget for live alerts
            MonitorEvent::Record(_) => (self.records_topic.as_str(), QoS::AtLeastOnce),
            MonitorEvent::Notification(_) => (self.events_topic.as_str(), QoS::AtMostOnce),
        }
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError> {
        let json = event.to_json()?;
        let (topic, qos) = self.route(event);
        self.client
            .try_publish(topic, qos, false, json.into_bytes())
            .map_err(|e| SinkError::Transport(format!("mqtt queue: {e}")))?;
        debug!(topic = %topic, event = %event.kind_str(), "mqtt_sink_published");
        Ok(())
    }
}

/// Drive the MQTT connection until shutdown
pub async fn run_event_loop(mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
    info!("mqtt_sink_started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_sink_shutdown");
                    return;
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_sink_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        // QoS 1 acknowledgement received
                        debug!("mqtt_sink_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_sink_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
