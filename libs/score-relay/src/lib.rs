pub mod endpoint;
pub mod error;
pub mod message;
pub mod mqtt;
pub mod relay;
pub mod scorer;
pub mod transport;

pub use endpoint::{
    BrokerEndpoint, ConnectPolicy, BROKER_ADDRESS_ENV, DEFAULT_HOST, DEFAULT_PORT, EDGE_HOST,
};
pub use error::RelayError;
pub use message::{topic_matches, Score, ScoreMessage, TelemetryMessage, SCORE_TOPIC, TELEMETRY_TOPIC};
pub use mqtt::{connect_with_policy, Dispatch, MqttPublisher, MqttSession};
pub use relay::{run, RelaySettings, RelayState, TelemetryScoreRelay};
pub use scorer::{RandomScorer, Scorer};
pub use transport::{ScorePublisher, SessionOptions, DEFAULT_CLIENT_ID};

pub use rumqttc::QoS;
