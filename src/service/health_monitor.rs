use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::BackendClient;
use crate::models::HealthStatus;

/// Polls `/health` on a fixed interval and publishes the result.
pub struct HealthMonitor {
    status: watch::Receiver<HealthStatus>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Starts polling immediately, then every `interval`.
    pub fn spawn(client: BackendClient, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(HealthStatus::checking());
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let poll = async {
                    ticker.tick().await;
                    client.health_status().await
                };
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    status = poll => {
                        if *tx.borrow() != status {
                            info!(
                                system = status.system.as_str(),
                                ollama = %status.ollama,
                                "backend health changed"
                            );
                        }
                        tx.send_replace(status);
                    }
                }
            }
            debug!("health monitor stopped");
        });

        Self { status: rx, cancel, handle: Some(handle) }
    }

    pub fn current(&self) -> HealthStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.clone()
    }

    /// Stops polling and waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
