// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue processor state machine.
//!
//! `Idle -> Draining -> {Idle | Paused} -> Draining`, with `Disposed` terminal.

use ferry_core::ProcessorState;

/// Inputs that drive [`ProcessorState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorInput {
    /// Work is available and the network is up.
    Start,
    /// The queue ran empty.
    Drained,
    /// Connectivity dropped while draining.
    WentOffline,
    /// Connectivity returned.
    WentOnline,
    /// The credential is gone; wait for the next login.
    Blocked,
    Dispose,
}

/// Computes the next state. Inputs that do not apply leave the state unchanged.
pub fn transition(state: ProcessorState, input: ProcessorInput) -> ProcessorState {
    use ProcessorInput as I;
    use ProcessorState as S;

    match (state, input) {
        (S::Disposed, _) | (_, I::Dispose) => S::Disposed,
        (S::Idle, I::Start) => S::Draining,
        (S::Paused, I::WentOnline) => S::Draining,
        (S::Draining, I::Drained) => S::Idle,
        (S::Draining, I::WentOffline) | (S::Draining, I::Blocked) => S::Paused,
        (S::Idle, I::Blocked) => S::Paused,
        (s, _) => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessorInput as I;
    use ProcessorState as S;

    #[test]
    fn drain_cycle() {
        assert_eq!(transition(S::Idle, I::Start), S::Draining);
        assert_eq!(transition(S::Draining, I::Drained), S::Idle);
        assert_eq!(transition(S::Draining, I::WentOffline), S::Paused);
        assert_eq!(transition(S::Paused, I::WentOnline), S::Draining);
    }

    #[test]
    fn irrelevant_inputs_are_ignored() {
        assert_eq!(transition(S::Idle, I::WentOnline), S::Idle);
        assert_eq!(transition(S::Idle, I::WentOffline), S::Idle);
        assert_eq!(transition(S::Idle, I::Drained), S::Idle);
        assert_eq!(transition(S::Paused, I::Start), S::Paused);
        assert_eq!(transition(S::Draining, I::Start), S::Draining);
    }

    #[test]
    fn blocked_pauses() {
        assert_eq!(transition(S::Draining, I::Blocked), S::Paused);
        assert_eq!(transition(S::Idle, I::Blocked), S::Paused);
    }

    #[test]
    fn disposed_is_terminal() {
        for state in [S::Idle, S::Draining, S::Paused] {
            assert_eq!(transition(state, I::Dispose), S::Disposed);
        }
        for input in [I::Start, I::WentOnline, I::Drained, I::WentOffline, I::Blocked] {
            assert_eq!(transition(S::Disposed, input), S::Disposed);
        }
    }
}
