//! Graceful stop on SIGINT / SIGTERM.
//!
//! A signal cancels the returned token. The worker loop checks it between
//! iterations and during backoff; a job already running is left to finish.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Register the signal streams and spawn a task that cancels the token on the
/// first signal. Must be called from inside the runtime.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(cancel_on_signal(sigterm, sigint, token.clone()));
    Ok(token)
}

async fn cancel_on_signal(mut sigterm: Signal, mut sigint: Signal, token: CancellationToken) {
    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
        _ = token.cancelled() => return,
    };
    tracing::info!(signal = name, "Stop requested, finishing the current step");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_starts_live_and_cancels_cleanly() {
        let token = install_shutdown_handler().unwrap();
        assert!(!token.is_cancelled());

        // Cancelling from elsewhere also ends the listener task.
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }
}
