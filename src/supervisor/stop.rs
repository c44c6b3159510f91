//! Single-fire stop request from the health checker to the runner.

use tokio::sync::oneshot;

/// Sending half; firing consumes it, so a stop can be requested at most once.
#[derive(Debug)]
pub struct StopTrigger {
    tx: oneshot::Sender<()>,
}

/// Receiving half, observed by the runner while it waits on the process.
#[derive(Debug)]
pub struct StopSignal {
    rx: oneshot::Receiver<()>,
}

pub fn stop_channel() -> (StopTrigger, StopSignal) {
    let (tx, rx) = oneshot::channel();
    (StopTrigger { tx }, StopSignal { rx })
}

impl StopTrigger {
    /// Request the stop. Returns false when nobody is listening anymore.
    pub fn fire(self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl StopSignal {
    /// Resolves to true once fired, or false if the trigger was dropped unfired.
    pub async fn fired(self) -> bool {
        self.rx.await.is_ok()
    }
}
