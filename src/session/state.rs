//! Projected session state.
//!
//! The presented state is a pure function of four flags, never stored
//! independently, so every combination maps to exactly one state and
//! the precedence is testable in isolation:
//!
//! connection closed ⇒ `error`, else playback ⇒ `speaking`, else
//! awaiting response ⇒ `processing`, else capture ⇒ `listening`,
//! else `idle`.

use parking_lot::Mutex;
use tokio::sync::watch;

/// What the interview looks like right now, for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Capture active, transmitting the user's audio.
    Listening,
    /// A chunk was sent and no response has arrived yet.
    Processing,
    /// An AI reply is audible; transmission is gated off.
    Speaking,
    /// Transport closed or a fatal startup failure.
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Speaking => "speaking",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four inputs the projection is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateInputs {
    pub connection_open: bool,
    pub playback_active: bool,
    pub awaiting_response: bool,
    pub capture_active: bool,
}

/// Total precedence projection; see module docs.
pub fn project(inputs: StateInputs) -> SessionState {
    if !inputs.connection_open {
        SessionState::Error
    } else if inputs.playback_active {
        SessionState::Speaking
    } else if inputs.awaiting_response {
        SessionState::Processing
    } else if inputs.capture_active {
        SessionState::Listening
    } else {
        SessionState::Idle
    }
}

/// Holds the current inputs and publishes the projection on change.
///
/// Starts at `idle`: the projection only applies once session startup
/// begins and the connection flag means something.
#[derive(Debug)]
pub struct StateTracker {
    inputs: Mutex<StateInputs>,
    tx: watch::Sender<SessionState>,
    started: Mutex<bool>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self {
            inputs: Mutex::new(StateInputs::default()),
            tx,
            started: Mutex::new(false),
        }
    }

    /// Switch from the pre-start `idle` to the live projection.
    pub fn begin(&self) {
        *self.started.lock() = true;
        self.publish();
    }

    /// Mutate the inputs atomically and republish the projection.
    pub fn update(&self, apply: impl FnOnce(&mut StateInputs)) {
        {
            let mut inputs = self.inputs.lock();
            apply(&mut inputs);
        }
        self.publish();
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        if !*self.started.lock() {
            return;
        }
        let state = project(*self.inputs.lock());
        self.tx.send_if_modified(|current| {
            if *current != state {
                tracing::info!(from = %current, to = %state, "session state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(open: bool, playback: bool, awaiting: bool, capture: bool) -> StateInputs {
        StateInputs {
            connection_open: open,
            playback_active: playback,
            awaiting_response: awaiting,
            capture_active: capture,
        }
    }

    #[test]
    fn projection_is_total_and_ordered() {
        for bits in 0u8..16 {
            let i = inputs(bits & 8 != 0, bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            let expected = if !i.connection_open {
                SessionState::Error
            } else if i.playback_active {
                SessionState::Speaking
            } else if i.awaiting_response {
                SessionState::Processing
            } else if i.capture_active {
                SessionState::Listening
            } else {
                SessionState::Idle
            };
            assert_eq!(project(i), expected, "inputs {i:?}");
        }
    }

    #[test]
    fn closed_connection_always_errors() {
        for bits in 0u8..8 {
            let i = inputs(false, bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            assert_eq!(project(i), SessionState::Error, "inputs {i:?}");
        }
    }

    #[test]
    fn playback_wins_over_everything_while_open() {
        for bits in 0u8..4 {
            let i = inputs(true, true, bits & 2 != 0, bits & 1 != 0);
            assert_eq!(project(i), SessionState::Speaking, "inputs {i:?}");
        }
    }

    #[test]
    fn tracker_starts_idle_until_begun() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(), SessionState::Idle);
        // Before begin(), flag changes do not publish.
        tracker.update(|i| i.connection_open = false);
        assert_eq!(tracker.current(), SessionState::Idle);

        tracker.begin();
        assert_eq!(tracker.current(), SessionState::Error);
    }

    #[test]
    fn tracker_follows_the_happy_path() {
        let tracker = StateTracker::new();
        tracker.begin();
        tracker.update(|i| i.connection_open = true);
        assert_eq!(tracker.current(), SessionState::Idle);
        tracker.update(|i| i.capture_active = true);
        assert_eq!(tracker.current(), SessionState::Listening);
        tracker.update(|i| i.awaiting_response = true);
        assert_eq!(tracker.current(), SessionState::Processing);
        tracker.update(|i| i.playback_active = true);
        assert_eq!(tracker.current(), SessionState::Speaking);
        tracker.update(|i| {
            i.playback_active = false;
            i.awaiting_response = false;
        });
        assert_eq!(tracker.current(), SessionState::Listening);
        tracker.update(|i| i.connection_open = false);
        assert_eq!(tracker.current(), SessionState::Error);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();
        tracker.begin();
        tracker.update(|i| {
            i.connection_open = true;
            i.capture_active = true;
        });
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Listening);
    }
}
