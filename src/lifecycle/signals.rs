//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for the configured shutdown signals
//! - Translate the first signal into a stop request (SIGQUIT = forced)
//! - Exit immediately on a second signal while the stop is in flight
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Signals are funneled into one channel of capacity 2
//! - Exit code on the impatient path is `128 + first signal number`

use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

use crate::observability::logging;

/// Shutdown signals the orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Hangup,
    Interrupt,
    Quit,
    Terminate,
}

impl Signal {
    /// Signals hooked when none are configured.
    pub const DEFAULTS: [Signal; 3] = [Signal::Terminate, Signal::Interrupt, Signal::Quit];

    /// POSIX signal number.
    pub fn number(self) -> i32 {
        match self {
            Signal::Hangup => 1,
            Signal::Interrupt => 2,
            Signal::Quit => 3,
            Signal::Terminate => 15,
        }
    }

    /// SIGQUIT asks for a forced stop; everything else is graceful.
    pub fn is_graceful(self) -> bool {
        self != Signal::Quit
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Signal::Hangup => SignalKind::hangup(),
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Quit => SignalKind::quit(),
            Signal::Terminate => SignalKind::terminate(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Hangup => "SIGHUP",
            Signal::Interrupt => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Terminate => "SIGTERM",
        };
        f.write_str(name)
    }
}

/// Receives the configured signals, in arrival order.
pub struct SignalListener {
    rx: mpsc::Receiver<Signal>,
}

impl SignalListener {
    /// Register handlers for `signals` (the defaults when empty).
    #[cfg(unix)]
    pub fn install(signals: &[Signal]) -> std::io::Result<Self> {
        let signals = if signals.is_empty() { &Signal::DEFAULTS[..] } else { signals };
        let (tx, rx) = mpsc::channel(2);

        for &signal in signals {
            let mut stream = tokio::signal::unix::signal(signal.kind())?;
            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(signal).await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(Self { rx })
    }

    /// Only Ctrl+C is available off unix; it maps to SIGINT.
    #[cfg(not(unix))]
    pub fn install(_signals: &[Signal]) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Signal::Interrupt).await.is_err() {
                    break;
                }
            }
        });
        Ok(Self { rx })
    }

    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Drive `stop` from the first signal and exit the process on the second.
pub fn hook<F, Fut>(mut listener: SignalListener, stop: F)
where
    F: FnOnce(Signal) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let Some(first) = listener.recv().await else {
            return;
        };
        tracing::info!(
            target: "ego",
            signal = %first,
            graceful = first.is_graceful(),
            "Shutdown signal received"
        );
        tokio::spawn(stop(first));

        if let Some(second) = listener.recv().await {
            tracing::error!(
                target: "ego",
                first = %first,
                second = %second,
                "Two signals received, exiting now"
            );
            logging::flush();
            std::process::exit(128 + first.number());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quit_is_forced() {
        assert!(Signal::Terminate.is_graceful());
        assert!(Signal::Interrupt.is_graceful());
        assert!(!Signal::Quit.is_graceful());
    }

    #[test]
    fn exit_codes_follow_signal_numbers() {
        assert_eq!(128 + Signal::Terminate.number(), 143);
        assert_eq!(128 + Signal::Interrupt.number(), 130);
        assert_eq!(Signal::Quit.to_string(), "SIGQUIT");
    }
}
