//! Shutdown signals that stop the supervised server.

use std::fmt;
use tokio::signal;

/// The signal that asked kzhost to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    /// The controlling terminal went away (closed SSH or tmux pane)
    Hangup,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if cfg!(windows) {
            "Ctrl+C"
        } else {
            match self {
                ShutdownSignal::Interrupt => "SIGINT",
                ShutdownSignal::Terminate => "SIGTERM",
                ShutdownSignal::Hangup => "SIGHUP",
            }
        };
        f.write_str(name)
    }
}

/// Waits for the first shutdown signal.
///
/// # Returns
///
/// Which signal arrived: SIGINT, SIGTERM or SIGHUP on Unix, Ctrl+C on
/// Windows. Fails only if the handlers cannot be installed.
pub async fn wait_for_shutdown() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;

        let received = tokio::select! {
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
            _ = hangup.recv() => ShutdownSignal::Hangup,
        };
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok(ShutdownSignal::Interrupt)
    }
}
