//! Cooperative cancellation.
//!
//! A watch channel carries the shutdown flag; the orchestrator checks it at
//! stage boundaries so the current stage always finishes and the checkpoint
//! on disk stays consistent. The binary wires SIGINT into the handle.

use tokio::sync::watch;

/// Sending side: trigger shutdown from signal handlers or embedders.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Receiving side: polled by long-running loops at safe points.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Spawn a task that triggers shutdown on the first Ctrl-C.
    pub fn listen_for_ctrl_c(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; finishing current stage then exiting");
                handle.trigger();
            }
        });
    }
}

impl ShutdownSignal {
    /// Signal that never fires, for embedders that manage their own lifetime.
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
