// MQTT 客户端实现，用于将从站数据发布到云端
use log::{debug, info, warn};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Custom error type for publish operations
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Client not connected")]
    NotConnected,
    #[error("Publish failed: {0}")]
    Client(String),
}

/// Outbound message sink used by the poll engine
pub trait Publisher {
    /// Fire-and-forget publish of a JSON payload
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError>;

    fn is_connected(&self) -> bool;

    /// Called once per scheduler tick
    fn service(&mut self, _now_ms: u64) {}
}

/// Configuration for MQTT client
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Pause after a connection error before the next attempt
    pub reconnect_interval: Duration,
    pub max_inflight: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "rtu-gateway".to_string(),
            keep_alive: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(20),
            max_inflight: 10,
        }
    }
}

/// MQTT publisher; the rumqttc connection is driven on its own thread
pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
    connected: Arc<AtomicBool>,
    /// Last state reported by `service`
    reported_connected: bool,
    _event_loop_handle: thread::JoinHandle<()>,
}

impl MqttPublisher {
    /// Creates the client and spawns the event loop that connects and reconnects
    pub fn connect(config: MqttConfig) -> Result<Self, PublishError> {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        mqtt_options.set_keep_alive(config.keep_alive);

        let (client, mut connection) = Client::new(mqtt_options, config.max_inflight);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&connected);
        let reconnect_interval = config.reconnect_interval;

        let event_loop_handle = thread::Builder::new()
            .name("mqtt-eventloop".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            flag.store(true, Ordering::Relaxed);
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            flag.store(false, Ordering::Relaxed);
                        }
                        Ok(_) => {}
                        Err(ConnectionError::RequestsDone) => break,
                        Err(e) => {
                            flag.store(false, Ordering::Relaxed);
                            warn!(
                                "MQTT connection error: {}, retrying in {}s",
                                e,
                                reconnect_interval.as_secs()
                            );
                            thread::sleep(reconnect_interval);
                        }
                    }
                }
                debug!("MQTT event loop stopped");
            })
            .map_err(|e| PublishError::Client(e.to_string()))?;

        info!("MQTT client {} targeting {}:{}", config.client_id, config.broker, config.port);
        Ok(Self {
            client,
            config,
            connected,
            reported_connected: false,
            _event_loop_handle: event_loop_handle,
        })
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| PublishError::Client(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn service(&mut self, _now_ms: u64) {
        let connected = self.is_connected();
        if connected != self.reported_connected {
            if connected {
                info!("MQTT connected to {}:{}", self.config.broker, self.config.port);
            } else {
                warn!("MQTT disconnected from {}:{}", self.config.broker, self.config.port);
            }
            self.reported_connected = connected;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every publish instead of sending it
    #[derive(Debug)]
    pub(crate) struct RecordingPublisher {
        pub messages: Vec<(String, String)>,
        pub connected: bool,
    }

    impl Default for RecordingPublisher {
        fn default() -> Self {
            Self {
                messages: Vec::new(),
                connected: true,
            }
        }
    }

    impl RecordingPublisher {
        pub(crate) fn payloads(&self) -> Vec<serde_json::Value> {
            self.messages
                .iter()
                .filter_map(|(_, payload)| serde_json::from_str(payload).ok())
                .collect()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
            if !self.connected {
                return Err(PublishError::NotConnected);
            }
            self.messages.push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[test]
    fn default_config_matches_broker_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.reconnect_interval, Duration::from_secs(20));
        assert_eq!(config.keep_alive, Duration::from_secs(30));
    }

    #[test]
    fn disconnected_recorder_refuses_publish() {
        let mut publisher = RecordingPublisher {
            connected: false,
            ..Default::default()
        };
        assert!(matches!(
            publisher.publish("t", "{}"),
            Err(PublishError::NotConnected)
        ));
        assert!(publisher.messages.is_empty());
    }
}
