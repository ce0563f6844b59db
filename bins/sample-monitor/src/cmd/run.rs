use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use score_relay::{RandomScorer, RelayError, Scorer, BROKER_ADDRESS_ENV};

use crate::config::{Effective, RunArgs};
use crate::error::MonitorError;

/// Сколько ждать relay после отмены token (его собственный drain короче).
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: RunArgs) -> Result<(), MonitorError> {
    tracing::info!("sample monitoring module starting");

    // --- Resolve config ---
    let eff = Effective::new(&args)?;
    tracing::info!(
        config = %args.config,
        profile = ?eff.profile,
        broker = %eff.settings.endpoint,
        policy = ?eff.settings.policy,
        input = %eff.settings.input_topic,
        output = %eff.settings.output_topic,
        "resolved settings"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let scorer: Arc<dyn Scorer> = Arc::new(RandomScorer);

    let relay = score_relay::run(&eff.settings, scorer, token.clone());
    supervise(relay, shutdown_signal(), token, SHUTDOWN_TIMEOUT).await
}

/// Ждать relay или сигнал. После сигнала (в том числе ошибки его установки)
/// token отменяется и relay получает `grace` на DISCONNECT.
async fn supervise<R, S>(relay: R, signal: S, token: CancellationToken, grace: Duration) -> Result<(), MonitorError>
where
    R: Future<Output = Result<(), RelayError>>,
    S: Future<Output = Result<(), MonitorError>>,
{
    tokio::pin!(relay);

    let signal = tokio::select! {
        result = &mut relay => {
            // relay ended on its own: startup failure or lost connection
            if let Err(e) = &result {
                if e.is_connection() {
                    tracing::error!(env = BROKER_ADDRESS_ENV, "broker unreachable, check the broker address");
                }
            }
            return result.map_err(MonitorError::from);
        }
        signal = signal => signal,
    };

    match &signal {
        Ok(()) => tracing::info!("shutting down..."),
        Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
    }
    token.cancel();

    match tokio::time::timeout(grace, relay).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(grace_ms = grace.as_millis() as u64, "relay did not stop in time"),
    }
    signal?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Ctrl+C или SIGTERM.
async fn shutdown_signal() -> Result<(), MonitorError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
