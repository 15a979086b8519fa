//! Broadcast flags shared by every agent.
//!
//! A [`Flag`] is a boolean that can be raised and cleared from anywhere and
//! awaited from anywhere. It is backed by a `tokio::sync::watch` channel, so
//! readers always see a whole value and waiters wake on every edge.

use std::sync::Arc;
use tokio::sync::watch;

/// A named, cloneable broadcast boolean.
///
/// Raising an already raised flag is a no-op, as is clearing a clear one:
/// [`Flag::raise`] and [`Flag::clear`] report whether they changed anything.
#[derive(Debug, Clone)]
pub struct Flag {
    name: &'static str,
    tx: Arc<watch::Sender<bool>>,
}

impl Flag {
    /// Creates a new, clear flag.
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    /// Returns the flag's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current value.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Raises the flag. Returns `false` if it was already raised.
    pub fn raise(&self) -> bool {
        self.tx.send_if_modified(|value| {
            if *value {
                false
            } else {
                *value = true;
                true
            }
        })
    }

    /// Clears the flag. Returns `false` if it was already clear.
    pub fn clear(&self) -> bool {
        self.tx.send_if_modified(|value| {
            if *value {
                *value = false;
                true
            } else {
                false
            }
        })
    }

    /// Completes once the flag is raised (immediately if it already is).
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|value| *value).await;
    }

    /// Completes once the flag is clear (immediately if it already is).
    pub async fn cleared(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|value| !*value).await;
    }

    /// Returns a raw watch receiver for callers that track edges themselves.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// The two cross-agent cancellation signals.
///
/// `fire` is raised by the hazard scheduler and cleared by the broker when
/// the venue reopens. `shutdown` is raised by the supervisor and never
/// cleared within a run.
#[derive(Debug, Clone)]
pub struct Signals {
    pub fire: Flag,
    pub shutdown: Flag,
}

impl Signals {
    /// Creates a fresh pair of clear flags.
    pub fn new() -> Self {
        Self {
            fire: Flag::new("fire"),
            shutdown: Flag::new("shutdown"),
        }
    }

    /// True if either flag is raised.
    pub fn is_interrupted(&self) -> bool {
        self.fire.is_set() || self.shutdown.is_set()
    }

    /// Completes once either flag is raised.
    pub async fn interrupted(&self) {
        tokio::select! {
            biased;
            _ = self.fire.raised() => {}
            _ = self.shutdown.raised() => {}
        }
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}
