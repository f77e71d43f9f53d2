//! MQTT publisher for live events
//!
//! Forwards every `LiveEvent` from the live channel to MQTT for dashboards:
//! - expedicao/packages - NewPackage hints (QoS 0)
//! - expedicao/day - DayClosed hints (QoS 0)
//!
//! Delivery is best effort. Dashboards reconcile from `GET /productivity`.

use crate::domain::types::LiveEvent;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::live_channel::LiveSubscription;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// MQTT publisher actor
pub struct MqttPublisher {
    client: AsyncClient,
    subscription: LiveSubscription,
    metrics: Arc<Metrics>,
    packages_topic: String,
    day_topic: String,
}

impl MqttPublisher {
    /// Connects to the broker at the configured MQTT host/port
    pub fn new(config: &Config, subscription: LiveSubscription, metrics: Arc<Metrics>) -> Self {
        let client_id = format!("expedicao-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            subscription,
            metrics,
            packages_topic: config.mqtt_egress_packages_topic().to_string(),
            day_topic: config.mqtt_egress_day_topic().to_string(),
        }
    }

    /// Run until shutdown or until the live channel closes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(packages = %self.packages_topic, day = %self.day_topic, "mqtt_egress_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        return;
                    }
                }
                event = self.subscription.recv(Some(&self.metrics)) => {
                    match event {
                        Some(event) => self.publish_event(&event),
                        None => {
                            info!("mqtt_egress_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn topic_for(&self, event: &LiveEvent) -> &str {
        match event {
            LiveEvent::NewPackage { .. } => &self.packages_topic,
            LiveEvent::DayClosed { .. } => &self.day_topic,
        }
    }

    fn publish_event(&self, event: &LiveEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, kind = %event.kind(), "mqtt_egress_serialize_failed");
                return;
            }
        };

        // try_publish keeps a stalled broker from back-pressuring the channel
        if let Err(e) = self.client.try_publish(self.topic_for(event), QoS::AtMostOnce, false, json) {
            debug!(error = %e, kind = %event.kind(), "mqtt_egress_publish_failed");
            self.metrics.record_live_events_dropped(1);
        }
    }
}
