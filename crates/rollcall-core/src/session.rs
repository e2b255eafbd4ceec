//! A live recognition session: the state machine plus its result history.

use crate::machine::{Effect, Event, Machine, MachineConfig, RecognitionState};
use crate::recognition::{RecognitionSettings, Verdict};
use crate::results::ResultBuffer;
use crate::types::RecognitionOutcome;
use serde::Serialize;

/// Point-in-time view of a session, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: RecognitionState,
    pub stability_counter: u32,
    pub retry_count: u32,
    pub max_retry: u32,
    pub confidence_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    pub result_capacity: usize,
    pub results: Vec<RecognitionOutcome>,
}

pub struct Session {
    machine: Machine,
    results: ResultBuffer,
}

impl Session {
    pub fn new(config: MachineConfig, result_capacity: usize) -> Self {
        Self {
            machine: Machine::new(config),
            results: ResultBuffer::with_capacity(result_capacity),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn state(&self) -> RecognitionState {
        self.machine.state()
    }

    pub fn results(&self) -> &ResultBuffer {
        &self.results
    }

    /// Begin a new watching session. Results from an earlier session are
    /// discarded.
    pub fn start(&mut self, settings: RecognitionSettings) -> Vec<Effect> {
        if self.machine.state() == RecognitionState::Idle {
            self.results.clear();
        }
        self.apply(Event::Start(settings))
    }

    /// Feed one event through the state machine.
    ///
    /// `Effect::Record` is applied here; every other effect is returned for
    /// the caller to execute in order.
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let before = self.machine.state();

        let (next, effects) = self.machine.transition(event);
        self.machine = next;

        let after = self.machine.state();
        if before != after {
            tracing::debug!(
                from = %before,
                to = %after,
                counter = self.machine.counter(),
                retry = self.machine.retry_count(),
                "state transition"
            );
            self.log_attempt(before, after);
        }

        let mut pending = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::Record(outcome) => {
                    if let Some(m) = &outcome.matched {
                        tracing::info!(
                            person_id = %m.person_id,
                            name = %m.name,
                            confidence = m.confidence,
                            "recognized"
                        );
                    }
                    self.results.push(outcome);
                }
                other => pending.push(other),
            }
        }
        pending
    }

    fn log_attempt(&self, before: RecognitionState, after: RecognitionState) {
        let failed_attempt = matches!(
            before,
            RecognitionState::Capturing | RecognitionState::Processing
        ) && matches!(
            after,
            RecognitionState::Detecting | RecognitionState::NoMatch
        );
        if !failed_attempt {
            return;
        }
        let reason = self
            .machine
            .last_rejection()
            .map(ToString::to_string)
            .unwrap_or_default();
        if after == RecognitionState::NoMatch {
            tracing::info!(
                attempts = self.machine.settings().max_retry,
                %reason,
                "retries exhausted"
            );
        } else {
            tracing::warn!(
                retry = self.machine.retry_count(),
                max_retry = self.machine.settings().max_retry,
                %reason,
                "recognition attempt failed"
            );
        }
    }

    /// Convenience wrapper for a completed recognition call.
    pub fn recognized(&mut self, ticket: u64, verdict: Verdict) -> Vec<Effect> {
        self.apply(Event::Recognized { ticket, verdict })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let settings = self.machine.settings();
        SessionSnapshot {
            state: self.machine.state(),
            stability_counter: self.machine.counter(),
            retry_count: self.machine.retry_count(),
            max_retry: settings.max_retry,
            confidence_threshold: settings.confidence_threshold,
            last_failure: self.machine.last_rejection().map(ToString::to_string),
            result_capacity: self.results.capacity(),
            results: self.results.to_vec(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(MachineConfig::default(), crate::results::DEFAULT_RESULT_CAPACITY)
    }
}
