//! Half-duplex interlock between playback and transmission.
//!
//! While synthesized speech is audible the client must not transmit
//! microphone audio (echo avoidance). The gate is the single source of
//! truth for that condition: the playback driver writes it, the capture
//! path reads it before every frame.
//!
//! Transitions are by intent, not by counting. Each `open()` mints a
//! generation token; `close(token)` only closes the gate if that token
//! is still current. A stale completion callback from a playback that
//! was replaced mid-flight therefore cannot close the gate under the
//! newer playback, and the newer playback's own completion cannot be
//! pre-empted by the older one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Token identifying one playback window. See [`PlaybackGate::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateGeneration(u64);

/// Shared speaking flag with generation-checked close.
#[derive(Debug, Clone)]
pub struct PlaybackGate {
    inner: Arc<GateInner>,
    changed_tx: watch::Sender<bool>,
}

#[derive(Debug)]
struct GateInner {
    open: AtomicBool,
    generation: AtomicU64,
}

impl PlaybackGate {
    pub fn new() -> Self {
        let (changed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(GateInner {
                open: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            changed_tx,
        }
    }

    /// Open the gate for a new playback, returning its generation token.
    ///
    /// Opening while already open replaces the in-flight playback
    /// context: the previous generation's `close` becomes a no-op.
    pub fn open(&self) -> GateGeneration {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.open.store(true, Ordering::Release);
        let _ = self.changed_tx.send(true);
        tracing::debug!(generation, "playback gate opened");
        GateGeneration(generation)
    }

    /// Close the gate if `token` still identifies the current playback.
    ///
    /// Returns whether the gate actually closed.
    pub fn close(&self, token: GateGeneration) -> bool {
        if self.inner.generation.load(Ordering::Acquire) != token.0 {
            tracing::debug!(stale = token.0, "ignoring close from replaced playback");
            return false;
        }
        self.inner.open.store(false, Ordering::Release);
        let _ = self.changed_tx.send(false);
        tracing::debug!(generation = token.0, "playback gate closed");
        true
    }

    /// Unconditionally close the gate, regardless of generation.
    ///
    /// Used on teardown and playback errors so a stuck-speaking state
    /// can never outlive its session.
    pub fn force_close(&self) {
        self.inner.open.store(false, Ordering::Release);
        let _ = self.changed_tx.send(false);
        tracing::debug!("playback gate force-closed");
    }

    /// Whether a playback is currently audible.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Subscribe to open/close transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.changed_tx.subscribe()
    }
}

impl Default for PlaybackGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let gate = PlaybackGate::new();
        assert!(!gate.is_open());
    }

    #[test]
    fn open_close_cycle() {
        let gate = PlaybackGate::new();
        let token = gate.open();
        assert!(gate.is_open());
        assert!(gate.close(token));
        assert!(!gate.is_open());
    }

    #[test]
    fn stale_close_cannot_shut_replacement_playback() {
        let gate = PlaybackGate::new();
        let first = gate.open();
        let second = gate.open(); // replaces the first playback
        assert!(gate.is_open());

        // The first playback's completion fires late: must be ignored.
        assert!(!gate.close(first));
        assert!(gate.is_open());

        assert!(gate.close(second));
        assert!(!gate.is_open());
    }

    #[test]
    fn force_close_ignores_generation() {
        let gate = PlaybackGate::new();
        let token = gate.open();
        gate.force_close();
        assert!(!gate.is_open());
        // The playback's own completion is now a harmless stale close
        // only in effect: it may still "succeed" but the gate stays shut.
        gate.close(token);
        assert!(!gate.is_open());
    }

    #[test]
    fn clones_share_state() {
        let gate = PlaybackGate::new();
        let other = gate.clone();
        let token = gate.open();
        assert!(other.is_open());
        other.close(token);
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let gate = PlaybackGate::new();
        let mut rx = gate.subscribe();
        assert!(!*rx.borrow());

        let token = gate.open();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        gate.close(token);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}
