//! Turn termination signals into a cancelled shutdown token.
//!
//! Without this a SIGTERM or SIGHUP would kill the process with the terminal
//! still in raw mode. The terminal loop notices the token within one tick
//! and unwinds normally.

use std::future::Future;
use std::io;

use harpoon_core::CancellationToken;
use tokio::runtime::Runtime;

/// Keeps the signal listener alive. Dropping it stops listening.
pub struct SignalGuard {
    runtime: Option<Runtime>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Cancel `shutdown` on SIGINT, SIGTERM or SIGHUP (Ctrl-C elsewhere).
pub fn cancel_on_signal(shutdown: &CancellationToken) -> io::Result<SignalGuard> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("harpoon-signal")
        .enable_all()
        .build()?;
    let received = {
        // Handlers are installed here, so a failure reaches the caller.
        let _context = runtime.enter();
        termination()?
    };
    runtime.spawn(cancel_when(shutdown.clone(), received));
    Ok(SignalGuard {
        runtime: Some(runtime),
    })
}

/// Wait for `received` and cancel `shutdown`, unless shutdown comes first.
async fn cancel_when<F>(shutdown: CancellationToken, received: F)
where
    F: Future<Output = &'static str>,
{
    tokio::select! {
        _ = shutdown.cancelled() => {}
        name = received => {
            tracing::info!(signal = name, "shutting down on signal");
            shutdown.cancel();
        }
    }
}

#[cfg(unix)]
fn termination() -> io::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
        }
    })
}

#[cfg(not(unix))]
fn termination() -> io::Result<impl Future<Output = &'static str>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    })
}
