use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::QoS;

use crate::error::RelayError;

/// Publish side of a broker connection, as seen by the relay.
pub trait ScorePublisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>>;
}

/// Client id used when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "sample-monitoring-module";

/// Параметры MQTT-сессии.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub keep_alive: Duration,
    /// Сколько ждать CONNACK до признания брокера недоступным.
    pub connect_timeout: Duration,
    /// Ёмкость очереди запросов `AsyncClient`.
    pub request_capacity: usize,
    pub qos: QoS,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            request_capacity: 64,
            qos: QoS::AtMostOnce,
        }
    }
}
