use std::fmt;

use anyhow::Result;
use tokio::signal;

/// What asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    #[cfg(unix)]
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            #[cfg(unix)]
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolve on the first SIGINT (Ctrl+C) or SIGTERM.
///
/// # Errors
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let received = tokio::select! {
        result = interrupt() => result?,
        result = terminate() => result?,
    };

    tracing::info!(signal = %received, "Shutdown signal received");
    Ok(received)
}

async fn interrupt() -> Result<ShutdownSignal> {
    signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

#[cfg(unix)]
async fn terminate() -> Result<ShutdownSignal> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    handler.recv().await;
    Ok(ShutdownSignal::Terminate)
}

#[cfg(not(unix))]
async fn terminate() -> Result<ShutdownSignal> {
    std::future::pending().await
}
