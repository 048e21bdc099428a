use antenna_controller::{AntennaController, Command, Feedback, LinkError};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};
use tokio::sync::{Mutex, watch};

/// Single entry point to the mount controller.
///
/// Every transaction goes through [`Arbiter::execute`], which holds a fair
/// (FIFO) lock on the link for the whole round trip: callers are served in
/// the order they asked and two transactions never overlap on the wire.
pub struct Arbiter {
    link: Arc<Mutex<Box<dyn AntennaController>>>,
    open: AtomicBool,
    failures: AtomicU32,
    max_failures: u32,
    lost: watch::Sender<bool>,
}

impl Arbiter {
    /// `max_failures` consecutive transport failures declare the link lost.
    pub fn new(link: Box<dyn AntennaController>, max_failures: u32) -> Self {
        let open = link.is_open();

        Self {
            link: Arc::new(Mutex::new(link)),
            open: AtomicBool::new(open),
            failures: AtomicU32::new(0),
            max_failures: max_failures.max(1),
            lost: watch::Sender::new(false),
        }
    }

    pub async fn open(&self) -> Result<(), LinkError> {
        let result = self.blocking(|link| link.open()).await?;

        if result.is_ok() {
            self.open.store(true, Ordering::SeqCst);
            self.failures.store(0, Ordering::SeqCst);
            self.lost.send_replace(false);
        }

        result
    }

    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);

        if let Err(e) = self.blocking(|link| link.close()).await {
            log::error!("[ARBITER] closing the link failed: {}", e);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Fires once consecutive transport failures reach the configured cap.
    pub fn lost(&self) -> watch::Receiver<bool> {
        self.lost.subscribe()
    }

    /// Runs one transaction.
    ///
    /// A closed link answers [`LinkError::NotConnected`] right away; it is
    /// an ordinary failure value and does not count towards the cap.
    pub async fn execute(&self, command: Command) -> Result<Feedback, LinkError> {
        if !self.is_open() {
            return Err(LinkError::NotConnected);
        }

        log::debug!("[ARBITER] -> {}", command);

        let result = self
            .blocking(move |link| link.transact(&command))
            .await
            .and_then(|result| result);

        match &result {
            Ok(feedback) => {
                log::debug!("[ARBITER] <- {}", feedback);
                self.failures.store(0, Ordering::SeqCst);
            }
            Err(e) if e.is_transport() => self.record_failure(e),
            Err(_) => {}
        }

        result
    }

    fn record_failure(&self, error: &LinkError) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        log::warn!(
            "[ARBITER] transaction failed ({}/{}): {}",
            failures,
            self.max_failures,
            error
        );

        if failures >= self.max_failures && !self.lost.send_replace(true) {
            log::error!("[ARBITER] link lost after {} failures", failures);
        }
    }

    /// Runs `f` on the link from the blocking pool, once the link is free.
    async fn blocking<T, F>(&self, f: F) -> Result<T, LinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn AntennaController>) -> T + Send + 'static,
    {
        let mut link = self.link.clone().lock_owned().await;

        tokio::task::spawn_blocking(move || f(&mut *link))
            .await
            .map_err(|e| LinkError::Io(io::Error::other(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antenna_controller::mock::MockController;
    use std::time::Duration;

    fn arbiter(max_failures: u32) -> (Arc<Arbiter>, antenna_controller::mock::MockHandle) {
        let mock = MockController::new();
        let handle = mock.handle();
        (Arc::new(Arbiter::new(Box::new(mock), max_failures)), handle)
    }

    #[tokio::test]
    async fn closed_link_is_not_connected() {
        let (arbiter, handle) = arbiter(5);

        let result = arbiter.execute(Command::Ping).await;

        assert!(matches!(result, Err(LinkError::NotConnected)));
        assert!(handle.journal().is_empty());
        assert!(!*arbiter.lost().borrow());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transactions_never_overlap() {
        let (arbiter, handle) = arbiter(5);
        arbiter.open().await.unwrap();
        handle.set_delay(Duration::from_millis(5));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let arbiter = arbiter.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        arbiter.execute(Command::GetAz).await.unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(handle.count("getAz"), 40);
        assert_eq!(handle.overlaps(), 0);
    }

    #[tokio::test]
    async fn consecutive_failures_declare_the_link_lost() {
        let (arbiter, handle) = arbiter(3);
        arbiter.open().await.unwrap();
        handle.set_unresponsive(true);

        let lost = arbiter.lost();

        for _ in 0..2 {
            assert!(matches!(
                arbiter.execute(Command::Ping).await,
                Err(LinkError::Timeout)
            ));
        }
        assert!(!*lost.borrow());

        let _ = arbiter.execute(Command::Ping).await;
        assert!(*lost.borrow());
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let (arbiter, handle) = arbiter(2);
        arbiter.open().await.unwrap();

        handle.set_unresponsive(true);
        let _ = arbiter.execute(Command::Ping).await;

        handle.set_unresponsive(false);
        arbiter.execute(Command::Ping).await.unwrap();

        handle.set_unresponsive(true);
        let _ = arbiter.execute(Command::Ping).await;

        assert!(!*arbiter.lost().borrow());
    }

    #[tokio::test]
    async fn close_refuses_further_transactions() {
        let (arbiter, _handle) = arbiter(5);
        arbiter.open().await.unwrap();
        assert!(arbiter.is_open());

        arbiter.close().await;

        assert!(!arbiter.is_open());
        assert!(matches!(
            arbiter.execute(Command::Ping).await,
            Err(LinkError::NotConnected)
        ));
    }
}
