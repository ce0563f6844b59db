use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{BrokerEndpoint, ConnectPolicy};
use crate::error::RelayError;
use crate::message::{ScoreMessage, TelemetryMessage, SCORE_TOPIC, TELEMETRY_TOPIC};
use crate::mqtt::{connect_with_policy, Dispatch};
use crate::scorer::Scorer;
use crate::transport::{ScorePublisher, SessionOptions};

/// How long the dispatch task gets to flush DISCONNECT on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ═══════════════════════════════════════════════════════════════
//  RelayState
// ═══════════════════════════════════════════════════════════════

/// Disconnected → Connected → Subscribed → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connected,
    Subscribed,
    Idle,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Disconnected => f.write_str("disconnected"),
            RelayState::Connected => f.write_str("connected"),
            RelayState::Subscribed => f.write_str("subscribed"),
            RelayState::Idle => f.write_str("idle"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  RelaySettings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub endpoint: BrokerEndpoint,
    pub policy: ConnectPolicy,
    pub session: SessionOptions,
    pub input_topic: String,
    pub output_topic: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            endpoint: BrokerEndpoint::default(),
            policy: ConnectPolicy::Strict,
            session: SessionOptions::default(),
            input_topic: TELEMETRY_TOPIC.into(),
            output_topic: SCORE_TOPIC.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TelemetryScoreRelay
// ═══════════════════════════════════════════════════════════════

/// Telemetry in, one score out per message.
///
/// The publisher and the scorer are injected, so the relay itself holds no
/// connection state.
pub struct TelemetryScoreRelay {
    publisher: Arc<dyn ScorePublisher>,
    scorer: Arc<dyn Scorer>,
    output_topic: String,
}

impl TelemetryScoreRelay {
    pub fn new(publisher: Arc<dyn ScorePublisher>, scorer: Arc<dyn Scorer>, output_topic: impl Into<String>) -> Self {
        Self {
            publisher,
            scorer,
            output_topic: output_topic.into(),
        }
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    /// Посчитать score и опубликовать ровно один ScoreMessage.
    pub async fn on_message(&self, message: &TelemetryMessage) -> Result<ScoreMessage, RelayError> {
        tracing::info!(topic = %message.topic, payload = %message.payload_lossy(), "received telemetry");

        let score = ScoreMessage::new(self.scorer.score(message));
        tracing::info!(score = score.score.get(), "posting updated score");

        let body = score.to_json()?;
        tracing::info!(
            topic = %self.output_topic,
            body = %String::from_utf8_lossy(&body),
            "publishing updated score"
        );
        self.publisher.publish(&self.output_topic, body).await?;
        Ok(score)
    }

    /// Relay loop: `on_message` для каждого входящего сообщения, пока не
    /// отменён token или не закрыт канал. Ошибки publish логируются,
    /// цикл продолжается. Возвращает число обработанных сообщений.
    pub async fn serve(&self, mut inbound: mpsc::UnboundedReceiver<TelemetryMessage>, token: CancellationToken) -> u64 {
        let mut handled = 0u64;
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    match message {
                        Some(message) => {
                            if let Err(e) = self.on_message(&message).await {
                                tracing::error!(topic = %message.topic, error = %e, "score relay error");
                            }
                            handled += 1;
                        }
                        None => break,
                    }
                }
                _ = token.cancelled() => break,
            }
        }
        tracing::info!(handled, "relay stopped");
        handled
    }
}

// ═══════════════════════════════════════════════════════════════
//  run: full lifecycle
// ═══════════════════════════════════════════════════════════════

/// Подключиться, подписаться, обрабатывать телеметрию до отмены `token`.
///
/// Обрыв соединения завершает `run` с `RelayError::Disconnected`:
/// переподключения нет.
pub async fn run(settings: &RelaySettings, scorer: Arc<dyn Scorer>, token: CancellationToken) -> Result<(), RelayError> {
    tracing::info!(state = %RelayState::Disconnected, broker = %settings.endpoint, "starting score relay");

    let session = connect_with_policy(&settings.endpoint, &settings.policy, &settings.session).await?;
    tracing::info!(state = %RelayState::Connected, broker = %session.endpoint(), "relay state");

    session.subscribe(&settings.input_topic)?;
    tracing::info!(state = %RelayState::Subscribed, topic = %settings.input_topic, "relay state");

    let Dispatch { publisher, inbound, mut handle } = session.spawn_dispatch(settings.input_topic.clone());
    let relay = TelemetryScoreRelay::new(publisher.clone(), scorer, settings.output_topic.clone());
    tracing::info!(state = %RelayState::Idle, output = %relay.output_topic(), "relay state");

    relay.serve(inbound, token.clone()).await;

    if !token.is_cancelled() {
        // канал закрылся сам: event loop завершился
        return match handle.await {
            Ok(Ok(())) => Err(RelayError::Channel("dispatch stopped")),
            Ok(Err(e)) => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "dispatch task panicked");
                Err(RelayError::Channel("dispatch task failed"))
            }
        };
    }

    tracing::info!("shutting down relay");
    if let Err(e) = publisher.disconnect().await {
        tracing::warn!(error = %e, "disconnect request failed");
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "dispatch ended with error during shutdown"),
        Ok(Err(e)) => tracing::warn!(error = %e, "dispatch task failed during shutdown"),
        Err(_) => {
            tracing::warn!("dispatch did not drain in time, aborting");
            handle.abort();
        }
    }

    tracing::info!(state = %RelayState::Disconnected, "relay shutdown complete");
    Ok(())
}
