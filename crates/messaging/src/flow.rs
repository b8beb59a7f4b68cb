use crate::delivery::Disposition;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::warn;

/// Running/paused flag that receivers can wait on.
#[derive(Debug)]
pub struct PauseSwitch {
    paused: watch::Sender<bool>,
}

impl PauseSwitch {
    /// Creates a switch in the running state.
    #[must_use]
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }

    /// Moves to paused. Returns `false`, and logs, if already paused.
    pub fn pause(&self) -> bool {
        let changed = self.paused.send_if_modified(|paused| !std::mem::replace(paused, true));

        if !changed {
            warn!("consumer already paused");
        }

        changed
    }

    /// Moves to running. Returns `false`, and logs, if already running.
    pub fn resume(&self) -> bool {
        let changed = self.paused.send_if_modified(|paused| std::mem::replace(paused, false));

        if !changed {
            warn!("consumer not paused");
        }

        changed
    }

    /// Whether the switch is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns once the switch is running.
    pub async fn wait_running(&self) {
        let mut receiver = self.paused.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = receiver.wait_for(|paused| !*paused).await;
    }
}

impl Default for PauseSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot acknowledgment suppression.
///
/// Once armed, the next disposition that would acknowledge is downgraded to a
/// redelivery. The gate disarms after the next settlement whatever it was.
#[derive(Debug, Default)]
pub struct AckGate {
    armed: AtomicBool,
}

impl AckGate {
    /// Creates a disarmed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
        }
    }

    /// Arms the gate for the next settlement.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Whether the next settlement will be suppressed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Applies and disarms the gate.
    pub fn apply(&self, disposition: Disposition) -> Disposition {
        if self.armed.swap(false, Ordering::SeqCst) && disposition.acknowledges() {
            Disposition::Redeliver
        } else {
            disposition
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_double_pause_is_noop() {
        let switch = PauseSwitch::new();

        assert!(switch.pause());
        assert!(!switch.pause());
        assert!(switch.is_paused());

        assert!(switch.resume());
        assert!(!switch.resume());
        assert!(!switch.is_paused());
    }

    #[tokio::test]
    async fn test_wait_running_blocks_until_resume() {
        let switch = Arc::new(PauseSwitch::new());
        switch.pause();

        let waiter = tokio::spawn({
            let switch = switch.clone();
            async move { switch.wait_running().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        switch.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_gate_suppresses_one_ack() {
        let gate = AckGate::new();
        gate.arm();

        assert_eq!(gate.apply(Disposition::Ack), Disposition::Redeliver);
        assert_eq!(gate.apply(Disposition::Ack), Disposition::Ack);
    }

    #[test]
    fn test_gate_resets_on_non_ack() {
        let gate = AckGate::new();
        gate.arm();

        assert_eq!(
            gate.apply(Disposition::RedeliverAndPause),
            Disposition::RedeliverAndPause
        );
        assert!(!gate.is_armed());
        assert_eq!(gate.apply(Disposition::Ack), Disposition::Ack);
    }
}
