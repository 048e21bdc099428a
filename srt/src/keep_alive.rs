use crate::{arbiter::Arbiter, gate::Gate};
use antenna_controller::Command;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pings the mount so it does not park itself for inactivity.
pub struct KeepAlive {
    gate: Arc<Gate>,
    task: JoinHandle<()>,
}

impl KeepAlive {
    /// Spawns the producer, disabled.
    pub fn spawn(arbiter: Arc<Arbiter>, interval: Duration, cancel: CancellationToken) -> Self {
        let gate = Arc::new(Gate::new("KEEP_ALIVE"));
        let task = tokio::spawn(run(arbiter, gate.clone(), interval, cancel));

        Self { gate, task }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run(arbiter: Arc<Arbiter>, gate: Arc<Gate>, interval: Duration, cancel: CancellationToken) {
    loop {
        if let Some(_pending) = gate.try_enter() {
            if let Err(e) = arbiter.execute(Command::Ping).await {
                log::warn!("[KEEP_ALIVE] ping failed: {}", e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    log::debug!("[KEEP_ALIVE] stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use antenna_controller::mock::MockController;

    #[tokio::test]
    async fn pings_only_while_enabled() {
        let mock = MockController::new();
        let handle = mock.handle();
        let arbiter = Arc::new(Arbiter::new(Box::new(mock), 5));
        arbiter.open().await.unwrap();

        let cancel = CancellationToken::new();
        let keep_alive = KeepAlive::spawn(arbiter, Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.count("ping"), 0);

        keep_alive.gate().enable();
        tokio::time::sleep(Duration::from_millis(100)).await;
        keep_alive.gate().quiesce().await;

        let pings = handle.count("ping");
        assert!(pings >= 2, "only {} pings", pings);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.count("ping"), pings);

        cancel.cancel();
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let arbiter = Arc::new(Arbiter::new(Box::new(MockController::new()), 5));
        let cancel = CancellationToken::new();
        let keep_alive = KeepAlive::spawn(arbiter, Duration::from_secs(60), cancel.clone());

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(keep_alive.is_finished());
    }
}
