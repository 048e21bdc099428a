//! Cooperative pause/resume of a background producer.
//!
//! A producer wraps each of its requests in a [`Pending`] guard obtained from
//! its gate. Whoever needs the producer silent calls [`Gate::quiesce`], which
//! disables the gate and returns once the in-flight request, if any, has
//! completed. Both flags live in watch channels, so nobody spins.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Gate {
    name: &'static str,
    enabled: watch::Sender<bool>,
    pending: watch::Sender<bool>,
}

/// Marks a request of the gate's producer as in flight until dropped.
#[derive(Debug)]
pub struct Pending<'a> {
    gate: &'a Gate,
}

impl Gate {
    /// Creates a disabled gate.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            enabled: watch::Sender::new(false),
            pending: watch::Sender::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn enable(&self) {
        if !self.enabled.send_replace(true) {
            log::debug!("[{}] enabled", self.name);
        }
    }

    /// Stops new requests without waiting for the current one.
    pub fn disable(&self) {
        if self.enabled.send_replace(false) {
            log::debug!("[{}] disabled", self.name);
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.borrow()
    }

    /// Claims the right to issue one request, if the gate is enabled.
    pub fn try_enter(&self) -> Option<Pending<'_>> {
        // Pending goes up before enabled is read, so a concurrent `quiesce`
        // either sees us pending or we see it disabled.
        self.pending.send_replace(true);

        if self.is_enabled() {
            Some(Pending { gate: self })
        } else {
            self.pending.send_replace(false);
            None
        }
    }

    /// Waits until the gate is enabled, then claims one request.
    pub async fn enter(&self) -> Pending<'_> {
        let mut enabled = self.enabled.subscribe();

        loop {
            if enabled.wait_for(|on| *on).await.is_err() {
                // The sender lives in `self`, it cannot be gone.
                unreachable!("gate dropped while entered");
            }

            if let Some(pending) = self.try_enter() {
                return pending;
            }
        }
    }

    /// Waits for the in-flight request, if any, to complete.
    pub async fn idle(&self) {
        let mut pending = self.pending.subscribe();
        let _ = pending.wait_for(|pending| !*pending).await;
    }

    /// Disables the gate and waits until no request is in flight.
    pub async fn quiesce(&self) {
        self.disable();
        self.idle().await;
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.gate.pending.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use tokio::time::timeout;

    #[test]
    fn disabled_gate_refuses_requests() {
        let gate = Gate::new("test");

        assert!(gate.try_enter().is_none());
        assert!(!gate.is_pending());
    }

    #[test]
    fn pending_lasts_as_long_as_the_guard() {
        let gate = Gate::new("test");
        gate.enable();

        let pending = gate.try_enter().unwrap();
        assert!(gate.is_pending());

        drop(pending);
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn quiesce_waits_for_the_request_in_flight() {
        let gate = Arc::new(Gate::new("test"));
        gate.enable();

        let producer = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _pending = gate.enter().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
        };

        // Let the producer claim its request.
        while !gate.is_pending() {
            tokio::task::yield_now().await;
        }

        gate.quiesce().await;

        assert!(!gate.is_pending());
        assert!(!gate.is_enabled());
        assert!(gate.try_enter().is_none());

        producer.await.unwrap();
    }

    #[tokio::test]
    async fn quiesce_on_idle_gate_returns_immediately() {
        let gate = Gate::new("test");
        gate.enable();

        timeout(Duration::from_millis(100), gate.quiesce())
            .await
            .expect("quiesce blocked on an idle gate");
    }

    #[tokio::test]
    async fn enter_waits_for_enable() {
        let gate = Arc::new(Gate::new("test"));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _pending = gate.enter().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        gate.enable();

        timeout(Duration::from_millis(500), waiter)
            .await
            .expect("enter did not wake up")
            .unwrap();
    }
}
