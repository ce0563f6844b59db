use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::endpoint::{BrokerEndpoint, ConnectPolicy};
use crate::error::RelayError;
use crate::message::{topic_matches, TelemetryMessage};
use crate::transport::{ScorePublisher, SessionOptions};

// ═══════════════════════════════════════════════════════════════
//  MqttSession: connected, not yet dispatching
// ═══════════════════════════════════════════════════════════════

/// Установленная MQTT-сессия: CONNACK получен, event loop ещё не запущен.
pub struct MqttSession {
    endpoint: BrokerEndpoint,
    client: AsyncClient,
    eventloop: EventLoop,
    options: SessionOptions,
}

impl MqttSession {
    /// Подключиться к брокеру и дождаться CONNACK.
    ///
    /// Любая сетевая ошибка, отказ брокера или таймаут превращаются в
    /// `RelayError::Connection` с host и port.
    pub async fn connect(endpoint: &BrokerEndpoint, options: &SessionOptions) -> Result<Self, RelayError> {
        let mut mqtt = MqttOptions::new(options.client_id.clone(), endpoint.host.clone(), endpoint.port);
        mqtt.set_keep_alive(options.keep_alive);
        let (client, mut eventloop) = AsyncClient::new(mqtt, options.request_capacity);

        let connection_error = |detail: String| RelayError::Connection {
            host: endpoint.host.clone(),
            port: endpoint.port,
            detail,
        };

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    // отказ брокера poll() сам возвращает как ConnectionRefused
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e.to_string()),
                }
            }
        };

        match tokio::time::timeout(options.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(detail)) => return Err(connection_error(detail)),
            Err(_) => {
                return Err(connection_error(format!(
                    "no CONNACK within {}ms",
                    options.connect_timeout.as_millis()
                )));
            }
        }

        tracing::info!(broker = %endpoint, client_id = %options.client_id, "mqtt connected");
        Ok(Self {
            endpoint: endpoint.clone(),
            client,
            eventloop,
            options: options.clone(),
        })
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Поставить SUBSCRIBE в очередь запросов. SUBACK придёт уже в dispatch loop.
    ///
    /// Синхронный: `EventLoop` не `Sync`, и `&MqttSession` через `.await`
    /// сделал бы future `run` не `Send`.
    pub fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        self.client
            .try_subscribe(topic, self.options.qos)
            .map_err(|e| RelayError::Subscribe { topic: topic.to_string(), detail: e.to_string() })?;
        tracing::info!(topic = %topic, qos = ?self.options.qos, "subscribe requested");
        Ok(())
    }

    /// Запустить event loop в отдельной task.
    ///
    /// Входящие PUBLISH, совпавшие с `filter`, уходят в unbounded канал:
    /// ни одно сообщение не теряется, и event loop не ждёт relay.
    /// Task завершается после отправки DISCONNECT или при обрыве соединения;
    /// переподключения нет.
    pub fn spawn_dispatch(self, filter: String) -> Dispatch {
        let MqttSession { endpoint, client, mut eventloop, options } = self;
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let result = loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !topic_matches(&publish.topic, &filter) {
                            tracing::debug!(topic = %publish.topic, filter = %filter, "ignoring unmatched publish");
                            continue;
                        }
                        let message = TelemetryMessage {
                            topic: publish.topic,
                            payload: publish.payload,
                        };
                        if tx.send(message).is_err() {
                            tracing::debug!(filter = %filter, "relay gone, dropping");
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        tracing::debug!(pkid = ack.pkid, codes = ?ack.return_codes, "suback");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break Ok(()),
                    Ok(_) => {}
                    Err(e) => {
                        break Err(RelayError::Disconnected {
                            host: endpoint.host.clone(),
                            port: endpoint.port,
                            detail: e.to_string(),
                        });
                    }
                }
            };
            tracing::info!(filter = %filter, "dispatch stopped");
            result
        });

        Dispatch {
            publisher: Arc::new(MqttPublisher { client, qos: options.qos }),
            inbound: rx,
            handle,
        }
    }
}

/// Результат `spawn_dispatch`: publish handle, входящие сообщения и task event loop'а.
pub struct Dispatch {
    pub publisher: Arc<MqttPublisher>,
    pub inbound: mpsc::UnboundedReceiver<TelemetryMessage>,
    pub handle: JoinHandle<Result<(), RelayError>>,
}

/// Подключение с учётом `ConnectPolicy`.
pub async fn connect_with_policy(
    endpoint: &BrokerEndpoint,
    policy: &ConnectPolicy,
    options: &SessionOptions,
) -> Result<MqttSession, RelayError> {
    policy
        .attempt(endpoint, |ep| {
            let options = options.clone();
            async move { MqttSession::connect(&ep, &options).await }
        })
        .await
}

// ═══════════════════════════════════════════════════════════════
//  MqttPublisher
// ═══════════════════════════════════════════════════════════════

pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    /// Queue a DISCONNECT; the dispatch task stops once it has been sent.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.client.disconnect().await
    }
}

impl ScorePublisher for MqttPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.client
                .publish(topic.clone(), self.qos, false, payload)
                .await
                .map_err(|e| RelayError::Publish { topic, detail: e.to_string() })
        })
    }
}
