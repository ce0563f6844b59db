use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use serde::Deserialize;

use score_relay::{
    BrokerEndpoint, ConnectPolicy, RelaySettings, SessionOptions, BROKER_ADDRESS_ENV, DEFAULT_CLIENT_ID,
    DEFAULT_HOST, DEFAULT_PORT, EDGE_HOST, SCORE_TOPIC, TELEMETRY_TOPIC,
};

use crate::error::MonitorError;

#[derive(Parser)]
#[command(name = "sample-monitor", about = "Sample monitoring module: telemetry in, score updates out")]
pub struct Cli {
    #[command(flatten)]
    pub args: RunArgs,
}

/// Профиль развёртывания: задаёт хост по умолчанию и fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// localhost, без fallback
    #[default]
    Local,
    /// mosquitto-модуль edge-runtime, fallback на localhost
    Edge,
}

impl Profile {
    fn default_host(self) -> &'static str {
        match self {
            Profile::Local => DEFAULT_HOST,
            Profile::Edge => EDGE_HOST,
        }
    }

    fn default_fallback(self) -> Option<&'static str> {
        match self {
            Profile::Local => None,
            Profile::Edge => Some(DEFAULT_HOST),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Путь к TOML конфиг файлу (может отсутствовать)
    #[arg(long, default_value = "sample-monitor.toml", env = "SAMPLE_MONITOR_CONFIG")]
    pub config: String,

    /// Профиль развёртывания
    #[arg(long, value_enum)]
    pub profile: Option<Profile>,

    /// Хост MQTT брокера
    #[arg(long, env = BROKER_ADDRESS_ENV)]
    pub host: Option<String>,

    /// Порт MQTT брокера
    #[arg(long)]
    pub port: Option<u16>,

    /// Запасной хост: одна попытка, если основной недоступен
    #[arg(long)]
    pub fallback_host: Option<String>,

    /// MQTT client id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Topic с телеметрией
    #[arg(long)]
    pub input_topic: Option<String>,

    /// Topic для score
    #[arg(long)]
    pub output_topic: Option<String>,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub profile: Option<Profile>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub fallback_host: Option<String>,
    pub client_id: Option<String>,
    pub input_topic: Option<String>,
    pub output_topic: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    /// Missing file yields the defaults; an unreadable or invalid one is an error.
    pub fn load(path: &str) -> Result<Self, MonitorError> {
        if !std::path::Path::new(path).exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        toml::from_str(&content)
            .map_err(|e| MonitorError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация после мержа: profile < config.toml < env/CLI
#[derive(Debug)]
pub struct Effective {
    pub profile: Profile,
    pub settings: RelaySettings,
}

impl Effective {
    pub fn new(args: &RunArgs) -> Result<Self, MonitorError> {
        let cfg = Config::load(&args.config)?;
        Self::merge(args, cfg)
    }

    pub fn merge(args: &RunArgs, cfg: Config) -> Result<Self, MonitorError> {
        let profile = args.profile.or(cfg.profile).unwrap_or_default();
        let port = args.port.or(cfg.port).unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        let mut endpoint = BrokerEndpoint::resolve(
            args.host.as_deref().or(cfg.host.as_deref()),
            profile.default_host(),
        );
        endpoint.port = port;

        let fallback = args
            .fallback_host
            .as_deref()
            .or(cfg.fallback_host.as_deref())
            .or(profile.default_fallback())
            .map(str::trim)
            .filter(|h| !h.is_empty() && *h != endpoint.host);
        let policy = match fallback {
            Some(host) => ConnectPolicy::Fallback(BrokerEndpoint::new(host, port)),
            None => ConnectPolicy::Strict,
        };

        let client_id = args
            .client_id
            .clone()
            .or(cfg.client_id)
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.into());
        if client_id.is_empty() || client_id.starts_with(char::is_whitespace) {
            return Err(invalid("client_id must be non-empty and not start with whitespace"));
        }

        let defaults = SessionOptions::default();
        let keep_alive = cfg.keep_alive_secs.map(Duration::from_secs).unwrap_or(defaults.keep_alive);
        if keep_alive < Duration::from_secs(5) {
            return Err(invalid("keep_alive_secs must be at least 5"));
        }
        let connect_timeout = cfg
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);
        if connect_timeout.is_zero() {
            return Err(invalid("connect_timeout_secs must be non-zero"));
        }

        let input_topic = args
            .input_topic
            .clone()
            .or(cfg.input_topic)
            .unwrap_or_else(|| TELEMETRY_TOPIC.into());
        if input_topic.is_empty() {
            return Err(invalid("input_topic must be non-empty"));
        }
        let output_topic = args
            .output_topic
            .clone()
            .or(cfg.output_topic)
            .unwrap_or_else(|| SCORE_TOPIC.into());
        if output_topic.is_empty() || output_topic.contains(['+', '#']) {
            return Err(invalid("output_topic must be a concrete topic without wildcards"));
        }

        Ok(Self {
            profile,
            settings: RelaySettings {
                endpoint,
                policy,
                session: SessionOptions {
                    client_id,
                    keep_alive,
                    connect_timeout,
                    ..defaults
                },
                input_topic,
                output_topic,
            },
        })
    }
}

fn invalid(detail: &str) -> MonitorError {
    MonitorError::Config { context: "validate", detail: detail.to_string() }
}
