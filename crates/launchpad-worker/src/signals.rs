//! Interrupt and termination handling.

use launchpad_core::LogPublisher;
use launchpad_executor::ActiveChildren;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, warn};

/// Exit status after SIGINT.
pub const INTERRUPTED: i32 = 130;
/// Exit status after SIGTERM.
pub const TERMINATED: i32 = 143;

/// Which signal stopped the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl Shutdown {
    pub fn exit_code(self) -> i32 {
        match self {
            Shutdown::Interrupt => INTERRUPTED,
            Shutdown::Terminate => TERMINATED,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Shutdown::Interrupt => "Process interrupted",
            Shutdown::Terminate => "Process terminated",
        }
    }
}

/// Watch for SIGINT/SIGTERM. On either, kill the running build scripts,
/// disconnect the publisher and exit, waiting at most `grace` for the log
/// queue to flush.
pub fn spawn_watch(publisher: Arc<dyn LogPublisher>, children: ActiveChildren, grace: Duration) {
    tokio::spawn(async move {
        let received = shutdown_signal().await;
        warn!("{}", received.message());
        stop_children(&children).await;
        if tokio::time::timeout(grace, publisher.close(grace))
            .await
            .is_err()
        {
            warn!("Forcing process exit after timeout");
        }
        std::process::exit(received.exit_code());
    });
}

/// `process::exit` skips destructors, so `kill_on_drop` never fires for a
/// script that is still running.
async fn stop_children(children: &ActiveChildren) -> usize {
    if children.is_empty() {
        return 0;
    }
    let killed = children.kill_all().await;
    warn!(killed, "Killed running build scripts");
    killed
}

async fn shutdown_signal() -> Shutdown {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => Shutdown::Interrupt,
        _ = terminate => Shutdown::Terminate,
    }
}
