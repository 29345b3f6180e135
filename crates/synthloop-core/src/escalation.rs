use std::collections::VecDeque;
use tracing::debug;

/// Number of identical failures in a row that count as "stuck"
pub const DEFAULT_ESCALATION_WINDOW: usize = 4;

/// What the loop should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    Continue,
    /// Ask for debug-instrumented code on the next attempt
    Escalate,
    /// Escalation was already tried and the failure persists
    Abort,
}

/// Per-session escalation state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationState {
    pub added_logs: bool,
}

/// Rolling history of failure signatures.
///
/// One tracker lives for the whole process and is handed to every run by
/// reference, so repeated failures are noticed across sessions too.
#[derive(Debug, Clone)]
pub struct EscalationTracker {
    history: VecDeque<String>,
    window: usize,
}

impl EscalationTracker {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_ESCALATION_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        Self {
            history: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// True iff the last `n` recorded signatures all equal `signature`
    pub fn has_repeated_n_times(&self, signature: &str, n: usize) -> bool {
        n > 0 && self.history.len() >= n && self.history.iter().rev().take(n).all(|s| s == signature)
    }

    /// Record a failure and decide how to proceed
    pub fn record(&mut self, signature: &str, state: &mut EscalationState) -> EscalationDecision {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(signature.to_string());

        let decision = if !self.has_repeated_n_times(signature, self.window) {
            EscalationDecision::Continue
        } else if state.added_logs {
            EscalationDecision::Abort
        } else {
            state.added_logs = true;
            EscalationDecision::Escalate
        };

        debug!(decision = ?decision, history = self.history.len(), "Recorded failure");
        decision
    }
}

impl Default for EscalationTracker {
    fn default() -> Self {
        Self::new()
    }
}
