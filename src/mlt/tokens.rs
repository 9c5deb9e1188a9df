use super::livetime::{LivetimeCounter, LivetimeState};
use crate::data::messages::TriggerDecisionToken;
use crate::data::types::{RunNumber, TriggerNumber};
use crate::observability::issue::{Issue, IssueLog};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Grace period before open decisions are reported at shutdown.
pub const OPEN_TRIGGER_GRACE_MS: u64 = 3000;

/// Credit-based back-pressure for trigger decisions.
///
/// Constructed with an initial number of tokens. Sending a decision spends
/// one token and records the trigger number as in flight; a returned
/// [`TriggerDecisionToken`] for the current run restores one and, when it
/// names a trigger, retires it from the in-flight set. With zero tokens no
/// further decisions may be issued and the livetime counter reads dead.
pub struct TokenManager {
    n_tokens: AtomicI64,
    in_flight: Mutex<BTreeSet<TriggerNumber>>,
    run_number: RunNumber,
    livetime: Arc<LivetimeCounter>,
    issues: IssueLog,
    name: String,
}

impl TokenManager {
    pub fn new(
        name: &str,
        initial_tokens: i64,
        run_number: RunNumber,
        livetime: Arc<LivetimeCounter>,
        issues: IssueLog,
    ) -> Self {
        Self {
            n_tokens: AtomicI64::new(initial_tokens),
            in_flight: Mutex::new(BTreeSet::new()),
            run_number,
            livetime,
            issues,
            name: name.to_string(),
        }
    }

    pub fn n_tokens(&self) -> i64 {
        self.n_tokens.load(Ordering::SeqCst)
    }

    pub fn triggers_allowed(&self) -> bool {
        self.n_tokens() > 0
    }

    /// Records a sent decision, spending one token. At zero the trigger is
    /// dead until a token returns.
    pub fn trigger_sent(&self, trigger_number: TriggerNumber) {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.insert(trigger_number);
        let remaining = self.n_tokens.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.livetime.set_state(LivetimeState::Dead);
        }
    }

    /// Endpoint callback: a token came back from downstream.
    pub fn receive_token(&self, token: &TriggerDecisionToken) {
        if token.run_number != self.run_number {
            return;
        }
        if self.n_tokens.fetch_add(1, Ordering::SeqCst) == 0 {
            self.livetime.set_state(LivetimeState::Live);
        }
        if token.completes_trigger() {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.remove(&token.trigger_number) {
                self.issues.record(
                    &self.name,
                    Issue::UnexpectedToken {
                        trigger_number: token.trigger_number,
                    },
                );
            }
        }
    }

    pub fn open_triggers(&self) -> Vec<TriggerNumber> {
        self.in_flight.lock().unwrap().iter().copied().collect()
    }

    /// Shutdown accounting: decisions still in flight after the grace
    /// period are reported.
    pub fn report_open_triggers(&self, run_elapsed_ms: u64) {
        let open = self.open_triggers();
        if !open.is_empty() && run_elapsed_ms > OPEN_TRIGGER_GRACE_MS {
            self.issues.record(
                &self.name,
                Issue::OpenTriggerDecisions {
                    trigger_numbers: open,
                },
            );
        }
    }
}
