//! Interrupt gate: lets an operator pause a running turn, leave one message,
//! and resume it.
//!
//! All state lives behind a single `watch` channel, and every transition is
//! one atomic modification of it. The worker side only ever sees messages
//! that were released by [`InterruptController::unlock`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unlocked,
    Locked,
}

#[derive(Debug, Clone)]
struct Delivery {
    seq: u64,
    text: String,
}

#[derive(Debug, Default)]
struct Gate {
    locked: bool,
    mailbox: Option<String>,
    delivered: Option<Delivery>,
    next_seq: u64,
}

impl Gate {
    fn state(&self) -> GateState {
        if self.locked {
            GateState::Locked
        } else {
            GateState::Unlocked
        }
    }

    fn delivered_seq(&self) -> u64 {
        self.delivered.as_ref().map_or(0, |d| d.seq)
    }
}

/// Operator-side handle. Cheap to clone; all clones drive the same gate.
#[derive(Debug, Clone)]
pub struct InterruptController {
    tx: Arc<watch::Sender<Gate>>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Gate::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> GateState {
        self.tx.borrow().state()
    }

    pub fn is_locked(&self) -> bool {
        self.state() == GateState::Locked
    }

    /// `Unlocked → Locked`. Returns `false` if the gate was already locked.
    pub fn lock(&self) -> bool {
        let changed = self.tx.send_if_modified(|gate| {
            if gate.locked {
                return false;
            }
            gate.locked = true;
            true
        });
        if changed {
            info!("Interrupt gate locked");
        } else {
            debug!("Interrupt gate already locked");
        }
        changed
    }

    /// Leave a message in the mailbox, replacing any unreleased one.
    /// Only accepted while locked.
    pub fn submit(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        let mut accepted = false;
        // Mailbox contents are invisible to receivers, so never notify here.
        self.tx.send_if_modified(|gate| {
            if gate.locked {
                if gate.mailbox.is_some() {
                    debug!("Replacing unreleased interrupt message");
                }
                gate.mailbox = Some(text);
                accepted = true;
            }
            false
        });
        if !accepted {
            warn!("Interrupt submitted while gate unlocked; ignored");
        }
        accepted
    }

    /// `Locked → Unlocked`, releasing the pending message (if any) to the
    /// running turn. Returns `false` if the gate was not locked.
    pub fn unlock(&self) -> bool {
        let mut released = false;
        let changed = self.tx.send_if_modified(|gate| {
            if !gate.locked {
                return false;
            }
            gate.locked = false;
            if let Some(text) = gate.mailbox.take() {
                gate.next_seq += 1;
                gate.delivered = Some(Delivery {
                    seq: gate.next_seq,
                    text,
                });
                released = true;
            }
            true
        });
        if changed {
            info!(released, "Interrupt gate unlocked");
        } else {
            warn!("Unlock without a prior lock; ignored");
        }
        changed
    }

    /// Worker-side view for one turn. Messages released before this call are
    /// not observed.
    pub fn subscribe(&self) -> InterruptInbox {
        let rx = self.tx.subscribe();
        let last_seen = rx.borrow().delivered_seq();
        InterruptInbox { rx, last_seen }
    }
}

/// Worker-side view of the gate.
#[derive(Debug)]
pub struct InterruptInbox {
    rx: watch::Receiver<Gate>,
    last_seen: u64,
}

impl InterruptInbox {
    /// Event-boundary check. Waits while the gate is locked, then returns a
    /// newly released message exactly once.
    pub async fn checkpoint(&mut self) -> Option<String> {
        if self.rx.borrow().locked {
            debug!("Paused at interrupt gate");
        }
        // A dropped controller can never lock again; fall through.
        let _ = self.rx.wait_for(|gate| !gate.locked).await.map(|_| ());
        self.try_take()
    }

    /// Take a released message without waiting on the gate.
    pub fn try_take(&mut self) -> Option<String> {
        let gate = self.rx.borrow_and_update();
        match &gate.delivered {
            Some(delivery) if delivery.seq > self.last_seen => {
                self.last_seen = delivery.seq;
                Some(delivery.text.clone())
            }
            _ => None,
        }
    }
}
