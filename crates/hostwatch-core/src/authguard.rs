// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Credential-revocation detector. The HTTP layers report every 401/403
//! here; when enough of them land inside a sliding window, a key-check
//! signal is delivered to the supervisor, which probes the control plane
//! and hibernates the agent if the credential is gone.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

const ERROR_THRESHOLD: u32 = 10;
const EVALUATION_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct GuardState {
    error_count: u32,
    last_error: Option<Instant>,
}

/// One per process, constructed at startup and handed to every HTTP client
/// through the service wiring.
#[derive(Debug)]
pub struct AuthGuard {
    state: Mutex<GuardState>,
    key_check_tx: mpsc::Sender<()>,
}

impl AuthGuard {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let guard = Self {
            state: Mutex::new(GuardState::default()),
            key_check_tx: tx,
        };
        (guard, rx)
    }

    /// Called on every 401/403 response. Counts failures, resetting the
    /// counter when more than the evaluation period has passed since the
    /// previous one; at the threshold it emits one key-check signal and
    /// starts over.
    pub fn on_unauthorized(&self) {
        if self.note_failure(Instant::now()) {
            warn!("authentication error threshold reached, requesting a key check");
            // A signal is already pending if the channel is full; that one
            // check covers this failure too.
            let _ = self.key_check_tx.try_send(());
        }
    }

    fn note_failure(&self, now: Instant) -> bool {
        let mut state = self.state.lock().expect("authguard state poisoned");

        if let Some(last) = state.last_error {
            if now.duration_since(last) > EVALUATION_PERIOD {
                state.error_count = 0;
            }
        }

        state.error_count += 1;
        state.last_error = Some(now);

        if state.error_count >= ERROR_THRESHOLD {
            state.error_count = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_within_window_signals_once() {
        let (guard, mut rx) = AuthGuard::new();

        // Ten rapid failures land well inside the sliding window.
        for _ in 0..10 {
            guard.on_unauthorized();
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_spread_out_failures_never_fire() {
        let (guard, _rx) = AuthGuard::new();
        let start = Instant::now();

        // Nine failures, each more than a minute after the previous one:
        // the counter resets every time.
        for i in 0..9u64 {
            assert!(!guard.note_failure(start + Duration::from_secs(i * 61)));
        }
    }

    #[test]
    fn test_counter_resets_after_firing() {
        let (guard, _rx) = AuthGuard::new();
        let start = Instant::now();

        for i in 0..9 {
            assert!(!guard.note_failure(start + Duration::from_secs(i)));
        }
        assert!(guard.note_failure(start + Duration::from_secs(9)));

        // The next burst needs a full ten failures again.
        for i in 10..19 {
            assert!(!guard.note_failure(start + Duration::from_secs(i)));
        }
        assert!(guard.note_failure(start + Duration::from_secs(19)));
    }

    #[test]
    fn test_exactly_nine_in_window_does_not_fire() {
        let (guard, _rx) = AuthGuard::new();
        let start = Instant::now();

        for i in 0..9 {
            assert!(!guard.note_failure(start + Duration::from_secs(i)));
        }
    }
}
