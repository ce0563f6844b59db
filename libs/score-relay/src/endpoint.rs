use std::fmt;
use std::future::Future;

use crate::error::RelayError;

/// Хост брокера по умолчанию (локальный mosquitto).
pub const DEFAULT_HOST: &str = "localhost";

/// Хост mosquitto-модуля в edge-развёртывании.
pub const EDGE_HOST: &str = "mosquittomodule.azure-iot-edge";

/// Порт брокера.
pub const DEFAULT_PORT: u16 = 1883;

/// Переменная окружения, переопределяющая хост брокера.
pub const BROKER_ADDRESS_ENV: &str = "MqttBrokerAddress";

// ═══════════════════════════════════════════════════════════════
//  BrokerEndpoint
// ═══════════════════════════════════════════════════════════════

/// Адрес брокера. Не меняется за время жизни процесса.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host from `host_override` when it is non-blank, otherwise `default_host`.
    /// Port is always [`DEFAULT_PORT`].
    pub fn resolve(host_override: Option<&str>, default_host: &str) -> Self {
        let host = host_override
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(default_host);
        Self::new(host, DEFAULT_PORT)
    }
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════
//  ConnectPolicy
// ═══════════════════════════════════════════════════════════════

/// Поведение при неудачном подключении к основному брокеру.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectPolicy {
    /// Ошибка подключения прерывает запуск.
    Strict,
    /// Ровно одна дополнительная попытка на запасной адрес, без backoff.
    Fallback(BrokerEndpoint),
}

impl ConnectPolicy {
    /// Run `connect` against `primary`, then at most once against the
    /// fallback endpoint if the first attempt failed to connect.
    pub async fn attempt<T, F, Fut>(&self, primary: &BrokerEndpoint, mut connect: F) -> Result<T, RelayError>
    where
        F: FnMut(BrokerEndpoint) -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        let err = match connect(primary.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(e) => e,
        };

        match self {
            ConnectPolicy::Fallback(fallback) if err.is_connection() => {
                tracing::warn!(error = %err, fallback = %fallback, "primary broker unreachable, trying fallback");
                connect(fallback.clone()).await
            }
            _ => Err(err),
        }
    }
}
