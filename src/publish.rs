/// MQTT publishing
///
/// Each run opens one short-lived broker session, sends its retained
/// messages at QoS 0 and disconnects. Subscribers pick up the latest value
/// per topic from the broker's retained store, so there is no retry: a
/// failed publish fails the run and the next scheduled run replaces it.

use std::time::Duration;

use rumqttc::{Client, ConnectionError, Event, MqttOptions, Outgoing, QoS};
use serde::Serialize;
use thiserror::Error;

use crate::logging::{self, DataSource};

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    /// JSON document.
    pub payload: String,
    pub retain: bool,
}

impl Publication {
    /// Retained JSON message built from any serializable payload.
    pub fn retained_json<T: Serialize>(topic: String, payload: &T) -> Result<Publication, PublishError> {
        Ok(Publication {
            topic,
            payload: serde_json::to_string(payload)?,
            retain: true,
        })
    }
}

/// Join topic segments with `/`, e.g. `["awair", "Home", "Bedroom", "sensor"]`.
pub fn topic<S: AsRef<str>>(segments: &[S]) -> String {
    segments.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("/")
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection failed: {0}")]
    Connection(#[from] ConnectionError),
}

// ---------------------------------------------------------------------------
// Publisher trait
// ---------------------------------------------------------------------------

pub trait Publisher {
    /// Send every message in `messages`, in order.
    fn publish_all(&mut self, messages: &[Publication]) -> Result<(), PublishError>;
}

/// Publishes to an MQTT broker over plain TCP.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    host: String,
    port: u16,
    client_id: String,
}

impl MqttPublisher {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        MqttPublisher {
            host: host.into(),
            port,
            client_id: format!("aqmon-{}", std::process::id()),
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish_all(&mut self, messages: &[Publication]) -> Result<(), PublishError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(5));
        let (client, mut connection) = Client::new(options, messages.len() + 1);

        for message in messages {
            client.publish(
                message.topic.as_str(),
                QoS::AtMostOnce,
                message.retain,
                message.payload.as_bytes().to_vec(),
            )?;
        }
        client.disconnect()?;

        // Drive the session until the disconnect has gone out; requests are
        // sent in order, so every publish precedes it.
        for event in connection.iter() {
            match event? {
                Event::Outgoing(Outgoing::Publish(_)) => {}
                Event::Outgoing(Outgoing::Disconnect) => break,
                _ => {}
            }
        }

        for message in messages {
            logging::debug(
                DataSource::Mqtt,
                Some(&message.topic),
                &format!("published {}", message.payload),
            );
        }
        Ok(())
    }
}

/// Keeps messages in memory instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    pub published: Vec<Publication>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        RecordingPublisher::default()
    }

    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|p| p.topic.as_str()).collect()
    }

    /// Most recent message on `topic`, parsed as JSON.
    pub fn last_json(&self, topic: &str) -> Option<serde_json::Value> {
        self.published
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .and_then(|p| serde_json::from_str(&p.payload).ok())
    }
}

impl Publisher for RecordingPublisher {
    fn publish_all(&mut self, messages: &[Publication]) -> Result<(), PublishError> {
        self.published.extend_from_slice(messages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_joins_segments() {
        assert_eq!(topic(&["purpleair", "sensor"]), "purpleair/sensor");
        assert_eq!(
            topic(&["awair".to_string(), "Home".to_string(), "Bedroom".to_string(), "sensor".to_string()]),
            "awair/Home/Bedroom/sensor"
        );
    }

    #[test]
    fn test_retained_json_encodes_payload() {
        let message = Publication::retained_json("purpleair/last_hour".to_string(), &json!({"st_aqi": -4}))
            .expect("json value always encodes");
        assert!(message.retain);
        assert_eq!(message.payload, r#"{"st_aqi":-4}"#);
    }

    #[test]
    fn test_recording_publisher_keeps_order() {
        let mut publisher = RecordingPublisher::new();
        let first = Publication::retained_json("a".to_string(), &json!({"n": 1})).expect("encode");
        let second = Publication::retained_json("b".to_string(), &json!({"n": 2})).expect("encode");
        let third = Publication::retained_json("a".to_string(), &json!({"n": 3})).expect("encode");
        publisher.publish_all(&[first, second, third]).expect("recording never fails");

        assert_eq!(publisher.topics(), vec!["a", "b", "a"]);
        assert_eq!(publisher.last_json("a"), Some(json!({"n": 3})));
        assert_eq!(publisher.last_json("missing"), None);
    }

    #[test]
    fn test_mqtt_publisher_with_nothing_to_send_does_not_connect() {
        // Port 9 (discard) is never an MQTT broker; an attempted connection would fail.
        let mut publisher = MqttPublisher::new("127.0.0.1", 9);
        assert!(publisher.publish_all(&[]).is_ok());
    }
}
