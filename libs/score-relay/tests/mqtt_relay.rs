//! Relay against a minimal in-process MQTT 3.1.1 peer speaking raw bytes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use score_relay::{
    connect_with_policy, run, BrokerEndpoint, ConnectPolicy, MqttSession, RandomScorer, RelayError,
    RelaySettings, SessionOptions, SCORE_TOPIC, TELEMETRY_TOPIC,
};

const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
const CONNACK_NOT_AUTHORIZED: [u8; 4] = [0x20, 0x02, 0x00, 0x05];

fn options() -> SessionOptions {
    SessionOptions {
        connect_timeout: Duration::from_secs(2),
        ..SessionOptions::default()
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Читать из сокета, пока в `buf[from..]` не появится `needle`.
async fn read_until(stream: &mut TcpStream, buf: &mut Vec<u8>, from: usize, needle: &[u8]) -> usize {
    loop {
        if let Some(pos) = buf.get(from..).and_then(|tail| find(tail, needle)) {
            return from + pos;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed the connection");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128, "single-byte remaining length only");
    let mut packet = vec![0x30, remaining as u8, (topic.len() >> 8) as u8, topic.len() as u8];
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Accept one client, answer its CONNECT with `connack`, keep the socket open.
async fn spawn_peer(connack: [u8; 4]) -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        read_until(&mut stream, &mut buf, 0, b"MQTT").await;
        stream.write_all(&connack).await.unwrap();
        let mut chunk = [0u8; 1024];
        while matches!(stream.read(&mut chunk).await, Ok(n) if n > 0) {}
    });
    (port, handle)
}

#[tokio::test]
async fn unreachable_broker_reports_host_and_port() {
    let port = free_port().await;
    let endpoint = BrokerEndpoint::new("127.0.0.1", port);

    let err = MqttSession::connect(&endpoint, &options()).await.err().unwrap();

    assert!(matches!(err, RelayError::Connection { .. }), "{err:?}");
    let text = err.to_string();
    assert!(text.contains("127.0.0.1"), "{text}");
    assert!(text.contains(&port.to_string()), "{text}");
}

#[tokio::test]
async fn silent_broker_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _hold = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let opts = SessionOptions {
        connect_timeout: Duration::from_millis(300),
        ..SessionOptions::default()
    };
    let err = MqttSession::connect(&BrokerEndpoint::new("127.0.0.1", port), &opts)
        .await
        .err()
        .unwrap();
    let text = err.to_string();
    assert!(text.contains(&format!("127.0.0.1:{port}")), "{text}");
    assert!(text.contains("CONNACK"), "{text}");
}

#[tokio::test]
async fn refused_connack_is_a_connection_error() {
    let (port, _peer) = spawn_peer(CONNACK_NOT_AUTHORIZED).await;
    let err = MqttSession::connect(&BrokerEndpoint::new("127.0.0.1", port), &options())
        .await
        .err()
        .unwrap();
    assert!(err.is_connection(), "{err:?}");
    let text = err.to_string();
    assert!(text.contains(&port.to_string()), "{text}");
    assert!(text.to_lowercase().contains("refused"), "{text}");
}

#[tokio::test]
async fn fallback_endpoint_is_used_once_primary_fails() {
    let dead = free_port().await;
    let (port, _peer) = spawn_peer(CONNACK_ACCEPTED).await;
    let fallback = BrokerEndpoint::new("127.0.0.1", port);

    let session = connect_with_policy(
        &BrokerEndpoint::new("127.0.0.1", dead),
        &ConnectPolicy::Fallback(fallback.clone()),
        &options(),
    )
    .await
    .unwrap();

    assert_eq!(session.endpoint(), &fallback);
}

#[tokio::test]
async fn strict_policy_gives_up_after_primary() {
    let dead = free_port().await;
    let err = connect_with_policy(&BrokerEndpoint::new("127.0.0.1", dead), &ConnectPolicy::Strict, &options())
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains(&dead.to_string()));
}

#[tokio::test]
async fn telemetry_burst_reaches_inbound_in_full() {
    const BURST: usize = 50;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let connect_at = read_until(&mut stream, &mut buf, 0, b"MQTT").await;
        stream.write_all(&CONNACK_ACCEPTED).await.unwrap();
        read_until(&mut stream, &mut buf, connect_at, TELEMETRY_TOPIC.as_bytes()).await;

        let mut burst = Vec::new();
        for i in 0..BURST {
            burst.extend(publish_packet(TELEMETRY_TOPIC, format!("speed={i}").as_bytes()));
        }
        stream.write_all(&burst).await.unwrap();

        let mut chunk = [0u8; 256];
        while matches!(stream.read(&mut chunk).await, Ok(n) if n > 0) {}
    });

    let session = MqttSession::connect(&BrokerEndpoint::new("127.0.0.1", port), &options())
        .await
        .unwrap();
    session.subscribe(TELEMETRY_TOPIC).unwrap();
    let mut dispatch = session.spawn_dispatch(TELEMETRY_TOPIC.to_string());

    // nobody reads inbound while the burst arrives
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut payloads = Vec::new();
    while payloads.len() < BURST {
        let message = tokio::time::timeout(Duration::from_secs(5), dispatch.inbound.recv())
            .await
            .expect("telemetry went missing")
            .unwrap();
        payloads.push(message.payload_lossy().into_owned());
    }
    let expected: Vec<String> = (0..BURST).map(|i| format!("speed={i}")).collect();
    assert_eq!(payloads, expected);

    dispatch.publisher.disconnect().await.unwrap();
    broker.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn telemetry_in_score_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (body_tx, body_rx) = tokio::sync::oneshot::channel::<String>();

    let broker = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();

        let connect_at = read_until(&mut stream, &mut buf, 0, b"MQTT").await;
        stream.write_all(&CONNACK_ACCEPTED).await.unwrap();

        // SUBSCRIBE carries the telemetry filter
        let subscribe_at = read_until(&mut stream, &mut buf, connect_at, TELEMETRY_TOPIC.as_bytes()).await;

        stream.write_all(&publish_packet("some/other/topic", b"ignored")).await.unwrap();
        stream.write_all(&publish_packet(TELEMETRY_TOPIC, b"speed=60")).await.unwrap();

        let topic_at = read_until(&mut stream, &mut buf, subscribe_at, SCORE_TOPIC.as_bytes()).await;
        let body_at = read_until(&mut stream, &mut buf, topic_at, br#"{"score":"#).await;
        let end = read_until(&mut stream, &mut buf, body_at, b"}").await;
        let _ = body_tx.send(String::from_utf8(buf[body_at..=end].to_vec()).unwrap());

        let mut chunk = [0u8; 256];
        while matches!(stream.read(&mut chunk).await, Ok(n) if n > 0) {}
    });

    let settings = RelaySettings {
        endpoint: BrokerEndpoint::new("127.0.0.1", port),
        session: options(),
        ..RelaySettings::default()
    };
    let token = CancellationToken::new();
    let relay = {
        let token = token.clone();
        tokio::spawn(async move { run(&settings, Arc::new(RandomScorer), token).await })
    };

    let body = tokio::time::timeout(Duration::from_secs(5), body_rx).await.unwrap().unwrap();
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
    assert!(result.is_ok(), "{result:?}");
    broker.abort();

    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    let obj = value.as_object().unwrap();
    assert_eq!(obj.len(), 1);
    let score = obj["score"].as_u64().unwrap();
    assert!((1..=100).contains(&score), "score {score}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_connection_ends_run_with_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let connect_at = read_until(&mut stream, &mut buf, 0, b"MQTT").await;
        stream.write_all(&CONNACK_ACCEPTED).await.unwrap();
        read_until(&mut stream, &mut buf, connect_at, TELEMETRY_TOPIC.as_bytes()).await;
        // broker goes away right after the subscription
    });

    let settings = RelaySettings {
        endpoint: BrokerEndpoint::new("127.0.0.1", port),
        session: options(),
        ..RelaySettings::default()
    };
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run(&settings, Arc::new(RandomScorer), CancellationToken::new()),
    )
    .await
    .expect("run must end when the broker drops the connection");

    let err = result.unwrap_err();
    assert!(matches!(err, RelayError::Disconnected { .. }), "{err:?}");
    assert!(err.to_string().contains(&port.to_string()));
}
