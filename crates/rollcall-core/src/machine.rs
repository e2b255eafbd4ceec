//! Capture / recognize / retry state machine.
//!
//! [`Machine::transition`] is a pure function of the current machine and one
//! [`Event`]. It never touches the camera, the network or a clock. Instead it
//! returns the [`Effect`]s the caller must carry out: start or stop the
//! sampling loop, grab and encode a frame, submit it, arm or cancel the
//! result-display timer, release the camera.
//!
//! ```text
//!  idle ──Start──▶ detecting ◀──────────────┐
//!                   │    ▲                  │ failed attempt
//!           counter ≥ T  │ counter < T      │ (retries left)
//!                   ▼    │                  │
//!                 stabilizing ──≥ T+m──▶ capturing ──▶ processing
//!                                                       │      │
//!                                                  match│      │retries exhausted
//!                                                       ▼      ▼
//!                                                   success  no_match
//!                                                       └──┬───┘
//!                                               display elapsed → detecting / idle
//! ```

use crate::presence::PresenceSignal;
use crate::recognition::{RecognitionSettings, Rejection, Verdict};
use crate::stability::{StabilityTracker, DEFAULT_PRESENCE_THRESHOLD};
use crate::types::RecognitionOutcome;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_STABILITY_THRESHOLD: u32 = 10;
pub const DEFAULT_CAPTURE_MARGIN: u32 = 5;
pub const DEFAULT_RESULT_DISPLAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionState {
    Idle,
    Detecting,
    Stabilizing,
    Capturing,
    Processing,
    Success,
    NoMatch,
}

impl RecognitionState {
    /// The camera is held in every state but `Idle`.
    pub fn is_watching(self) -> bool {
        !matches!(self, RecognitionState::Idle)
    }

    /// States in which the sampling loop runs.
    pub fn is_sampling(self) -> bool {
        matches!(
            self,
            RecognitionState::Detecting | RecognitionState::Stabilizing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecognitionState::Idle => "idle",
            RecognitionState::Detecting => "detecting",
            RecognitionState::Stabilizing => "stabilizing",
            RecognitionState::Capturing => "capturing",
            RecognitionState::Processing => "processing",
            RecognitionState::Success => "success",
            RecognitionState::NoMatch => "no_match",
        }
    }
}

impl std::fmt::Display for RecognitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning constants for presence and timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineConfig {
    /// Variance above which a frame counts as "something present".
    pub presence_threshold: f32,
    /// Counter value at which `detecting` becomes `stabilizing`.
    pub stability_threshold: u32,
    /// Extra ticks past `stability_threshold` before capture.
    pub capture_margin: u32,
    /// How long `success` / `no_match` stay on screen.
    pub result_display: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            capture_margin: DEFAULT_CAPTURE_MARGIN,
            result_display: DEFAULT_RESULT_DISPLAY,
        }
    }
}

impl MachineConfig {
    pub fn capture_threshold(&self) -> u32 {
        self.stability_threshold.saturating_add(self.capture_margin)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The camera was acquired; begin watching with these settings.
    Start(RecognitionSettings),
    /// One sampling tick produced a signal.
    Signal(PresenceSignal),
    /// The frame for `ticket` was encoded and is ready to submit.
    Captured { ticket: u64 },
    /// The frame for `ticket` could not be grabbed or encoded.
    CaptureFailed { ticket: u64, reason: String },
    /// The recognizer answered the call made for `ticket`.
    Recognized { ticket: u64, verdict: Verdict },
    /// The result-display timer fired. Carries the settings for the next
    /// episode, read fresh when the timer fires.
    DisplayElapsed(RecognitionSettings),
    /// The frame source failed while watching.
    CameraLost,
    /// Explicit stop or teardown.
    Stop,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartSampling,
    StopSampling,
    Capture { ticket: u64 },
    Submit { ticket: u64 },
    ScheduleReset(Duration),
    CancelReset,
    ReleaseCamera,
    Record(RecognitionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    state: RecognitionState,
    tracker: StabilityTracker,
    retry_count: u32,
    settings: RecognitionSettings,
    config: MachineConfig,
    camera_active: bool,
    ticket: u64,
    last_rejection: Option<Rejection>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            state: RecognitionState::Idle,
            tracker: StabilityTracker::new(config.presence_threshold),
            retry_count: 0,
            settings: RecognitionSettings::default(),
            config,
            camera_active: false,
            ticket: 0,
            last_rejection: None,
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn counter(&self) -> u32 {
        self.tracker.counter()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn settings(&self) -> RecognitionSettings {
        self.settings
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Ticket of the most recent capture attempt.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.last_rejection.as_ref()
    }

    /// Apply one event. Events that make no sense in the current state
    /// (a late tick, a stale response, a timer after stop) are dropped.
    pub fn transition(&self, event: Event) -> (Machine, Vec<Effect>) {
        use RecognitionState::*;

        let mut next = self.clone();
        let mut effects = Vec::new();

        match (self.state, event) {
            (Idle, Event::Start(settings)) => {
                next.settings = settings.validated();
                next.camera_active = true;
                next.retry_count = 0;
                next.last_rejection = None;
                next.tracker.reset();
                next.state = Detecting;
                effects.push(Effect::StartSampling);
            }

            (Detecting | Stabilizing, Event::Signal(signal)) => {
                let counter = next.tracker.observe(signal);
                if counter >= self.config.capture_threshold() {
                    next.begin_capture(&mut effects);
                } else if counter >= self.config.stability_threshold {
                    next.state = Stabilizing;
                } else {
                    next.state = Detecting;
                }
            }

            (Capturing, Event::Captured { ticket }) if ticket == self.ticket => {
                next.state = Processing;
                effects.push(Effect::Submit { ticket });
            }

            (Capturing, Event::CaptureFailed { ticket, reason }) if ticket == self.ticket => {
                next.fail_attempt(Rejection::Capture(reason), &mut effects);
            }

            (Processing, Event::Recognized { ticket, verdict }) if ticket == self.ticket => {
                match verdict {
                    Verdict::Accepted(outcome) => {
                        next.state = Success;
                        next.last_rejection = None;
                        effects.push(Effect::Record(outcome));
                        effects.push(Effect::ScheduleReset(self.config.result_display));
                    }
                    Verdict::Rejected(reason) => next.fail_attempt(reason, &mut effects),
                }
            }

            (Success | NoMatch, Event::DisplayElapsed(settings)) => {
                next.settings = settings.validated();
                next.retry_count = 0;
                next.tracker.reset();
                if next.camera_active {
                    next.state = Detecting;
                    effects.push(Effect::StartSampling);
                } else {
                    next.state = Idle;
                }
            }

            (state, Event::Stop | Event::CameraLost) => {
                next.state = Idle;
                next.camera_active = false;
                next.retry_count = 0;
                next.tracker.reset();
                if state.is_watching() {
                    effects.push(Effect::StopSampling);
                    effects.push(Effect::CancelReset);
                    effects.push(Effect::ReleaseCamera);
                }
            }

            _ => {}
        }

        (next, effects)
    }

    fn begin_capture(&mut self, effects: &mut Vec<Effect>) {
        self.state = RecognitionState::Capturing;
        self.tracker.reset();
        self.ticket += 1;
        effects.push(Effect::StopSampling);
        effects.push(Effect::Capture {
            ticket: self.ticket,
        });
    }

    /// One attempt failed: go back to watching, or end the episode once
    /// `max_retry` calls have been spent.
    fn fail_attempt(&mut self, reason: Rejection, effects: &mut Vec<Effect>) {
        self.last_rejection = Some(reason);
        if self.retry_count + 1 < self.settings.max_retry {
            self.retry_count += 1;
            self.tracker.reset();
            self.state = RecognitionState::Detecting;
            effects.push(Effect::StartSampling);
        } else {
            self.state = RecognitionState::NoMatch;
            effects.push(Effect::ScheduleReset(self.config.result_display));
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchInfo, RecognitionResponse, ResponseStatus};

    const PRESENT: PresenceSignal = PresenceSignal(600.0);
    const ABSENT: PresenceSignal = PresenceSignal(20.0);

    fn step(m: &mut Machine, event: Event) -> Vec<Effect> {
        let (next, effects) = m.transition(event);
        *m = next;
        effects
    }

    fn started() -> Machine {
        let mut m = Machine::default();
        step(&mut m, Event::Start(RecognitionSettings::default()));
        m
    }

    fn signals(m: &mut Machine, signal: PresenceSignal, n: usize) -> Vec<Effect> {
        let mut all = Vec::new();
        for _ in 0..n {
            all.extend(step(m, Event::Signal(signal)));
        }
        all
    }

    fn accepted(confidence: f32) -> Verdict {
        crate::recognition::classify(
            RecognitionResponse {
                status: ResponseStatus::Success,
                matched: Some(MatchInfo {
                    person_id: "st-7".into(),
                    name: "Grace".into(),
                    confidence,
                    extra: Default::default(),
                }),
                attendance: None,
                message: None,
            },
            0.85,
        )
    }

    fn retry() -> Verdict {
        Verdict::Rejected(Rejection::Backend {
            status: ResponseStatus::Retry,
            message: None,
        })
    }

    /// Drive from detecting through capture to processing; returns the ticket.
    fn to_processing(m: &mut Machine) -> u64 {
        let effects = signals(m, PRESENT, 15);
        let ticket = effects
            .iter()
            .find_map(|e| match e {
                Effect::Capture { ticket } => Some(*ticket),
                _ => None,
            })
            .expect("capture requested");
        let effects = step(m, Event::Captured { ticket });
        assert_eq!(effects, vec![Effect::Submit { ticket }]);
        assert_eq!(m.state(), RecognitionState::Processing);
        ticket
    }

    #[test]
    fn test_start_enters_detecting() {
        let mut m = Machine::default();
        let effects = step(&mut m, Event::Start(RecognitionSettings::default()));
        assert_eq!(m.state(), RecognitionState::Detecting);
        assert_eq!(effects, vec![Effect::StartSampling]);
    }

    #[test]
    fn test_ten_present_ticks_stabilize() {
        let mut m = started();
        signals(&mut m, PRESENT, 9);
        assert_eq!(m.state(), RecognitionState::Detecting);
        signals(&mut m, PRESENT, 1);
        assert_eq!(m.state(), RecognitionState::Stabilizing);
        assert_eq!(m.counter(), 10);
    }

    #[test]
    fn test_margin_reached_captures_then_processes() {
        let mut m = started();
        signals(&mut m, PRESENT, 10);
        let effects = signals(&mut m, PRESENT, 5);
        assert_eq!(m.state(), RecognitionState::Capturing);
        assert_eq!(m.counter(), 0);
        assert_eq!(
            effects,
            vec![Effect::StopSampling, Effect::Capture { ticket: 1 }]
        );
        step(&mut m, Event::Captured { ticket: 1 });
        assert_eq!(m.state(), RecognitionState::Processing);
    }

    #[test]
    fn test_regression_returns_to_detecting() {
        let mut m = started();
        signals(&mut m, PRESENT, 11);
        assert_eq!(m.state(), RecognitionState::Stabilizing);
        signals(&mut m, ABSENT, 1);
        assert_eq!(m.counter(), 9);
        assert_eq!(m.state(), RecognitionState::Detecting);
    }

    #[test]
    fn test_success_records_and_schedules_reset() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        let effects = step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: accepted(0.92),
            },
        );
        assert_eq!(m.state(), RecognitionState::Success);
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], Effect::Record(_)));
        assert_eq!(effects[1], Effect::ScheduleReset(DEFAULT_RESULT_DISPLAY));
    }

    #[test]
    fn test_low_confidence_is_a_failed_attempt() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: accepted(0.5),
            },
        );
        assert_eq!(m.state(), RecognitionState::Detecting);
        assert_eq!(m.retry_count(), 1);
        assert!(matches!(
            m.last_rejection(),
            Some(Rejection::LowConfidence { .. })
        ));
    }

    #[test]
    fn test_retries_exhaust_into_no_match() {
        let mut m = started();
        let mut calls = 0;
        let mut back_to_detecting = 0;
        let mut no_match_entries = 0;
        for _ in 0..5 {
            let ticket = to_processing(&mut m);
            calls += 1;
            let effects = step(
                &mut m,
                Event::Recognized {
                    ticket,
                    verdict: retry(),
                },
            );
            match m.state() {
                RecognitionState::Detecting => {
                    back_to_detecting += 1;
                    assert_eq!(effects, vec![Effect::StartSampling]);
                    assert_eq!(m.counter(), 0);
                }
                RecognitionState::NoMatch => {
                    no_match_entries += 1;
                    assert_eq!(effects, vec![Effect::ScheduleReset(DEFAULT_RESULT_DISPLAY)]);
                }
                other => panic!("unexpected state {other}"),
            }
        }
        assert_eq!(calls, 5);
        assert_eq!(back_to_detecting, 4);
        assert_eq!(no_match_entries, 1);
        assert_eq!(m.retry_count(), 4);
        assert_eq!(m.state(), RecognitionState::NoMatch);

        // No further capture is possible from no_match.
        let effects = signals(&mut m, PRESENT, 30);
        assert!(effects.is_empty());
        assert_eq!(m.state(), RecognitionState::NoMatch);
    }

    #[test]
    fn test_single_attempt_budget() {
        let mut m = Machine::default();
        step(
            &mut m,
            Event::Start(RecognitionSettings {
                confidence_threshold: 0.85,
                max_retry: 1,
            }),
        );
        let ticket = to_processing(&mut m);
        step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: retry(),
            },
        );
        assert_eq!(m.state(), RecognitionState::NoMatch);
    }

    #[test]
    fn test_capture_failure_counts_as_attempt() {
        let mut m = started();
        signals(&mut m, PRESENT, 15);
        let effects = step(
            &mut m,
            Event::CaptureFailed {
                ticket: 1,
                reason: "encode".into(),
            },
        );
        assert_eq!(m.state(), RecognitionState::Detecting);
        assert_eq!(m.retry_count(), 1);
        assert_eq!(effects, vec![Effect::StartSampling]);
    }

    #[test]
    fn test_capture_failures_exhaust_into_no_match() {
        let mut m = started();
        let mut seen = Vec::new();
        for _ in 0..5 {
            signals(&mut m, PRESENT, 15);
            assert_eq!(m.state(), RecognitionState::Capturing);
            let ticket = m.ticket();
            step(
                &mut m,
                Event::CaptureFailed {
                    ticket,
                    reason: "encode".into(),
                },
            );
            seen.push((m.state(), m.retry_count()));
        }
        assert_eq!(
            seen,
            vec![
                (RecognitionState::Detecting, 1),
                (RecognitionState::Detecting, 2),
                (RecognitionState::Detecting, 3),
                (RecognitionState::Detecting, 4),
                (RecognitionState::NoMatch, 4),
            ]
        );
        assert!(matches!(m.last_rejection(), Some(Rejection::Capture(_))));

        let effects = step(
            &mut m,
            Event::CaptureFailed {
                ticket: 99,
                reason: "late".into(),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(m.state(), RecognitionState::NoMatch);
    }

    #[test]
    fn test_capture_events_with_stale_ticket_are_ignored() {
        let mut m = started();
        signals(&mut m, PRESENT, 15);
        let current = m.ticket();

        let effects = step(&mut m, Event::Captured { ticket: current + 1 });
        assert!(effects.is_empty());
        let effects = step(
            &mut m,
            Event::CaptureFailed {
                ticket: current - 1,
                reason: "old".into(),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(m.state(), RecognitionState::Capturing);
        assert_eq!(m.retry_count(), 0);

        let effects = step(&mut m, Event::Captured { ticket: current });
        assert_eq!(effects, vec![Effect::Submit { ticket: current }]);
    }

    #[test]
    fn test_display_elapsed_applies_fresh_settings() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: accepted(0.92),
            },
        );
        step(
            &mut m,
            Event::DisplayElapsed(RecognitionSettings {
                confidence_threshold: 1.7,
                max_retry: 2,
            }),
        );
        assert_eq!(m.state(), RecognitionState::Detecting);
        assert_eq!(m.settings().max_retry, 2);
        assert_eq!(m.settings().confidence_threshold, 1.0);

        // The new budget governs the next episode.
        for _ in 0..2 {
            let ticket = to_processing(&mut m);
            step(
                &mut m,
                Event::Recognized {
                    ticket,
                    verdict: retry(),
                },
            );
        }
        assert_eq!(m.state(), RecognitionState::NoMatch);
    }

    #[test]
    fn test_no_second_capture_while_processing() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        let effects = signals(&mut m, PRESENT, 40);
        assert!(effects.is_empty());
        assert_eq!(m.state(), RecognitionState::Processing);
        assert_eq!(m.ticket(), ticket);
    }

    #[test]
    fn test_display_elapsed_resumes_detecting() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: accepted(0.92),
            },
        );
        let effects = step(&mut m, Event::DisplayElapsed(RecognitionSettings::default()));
        assert_eq!(m.state(), RecognitionState::Detecting);
        assert_eq!(m.retry_count(), 0);
        assert_eq!(effects, vec![Effect::StartSampling]);
    }

    #[test]
    fn test_no_match_display_elapsed_resets_retry() {
        let mut m = started();
        for _ in 0..5 {
            let ticket = to_processing(&mut m);
            step(
                &mut m,
                Event::Recognized {
                    ticket,
                    verdict: retry(),
                },
            );
        }
        step(&mut m, Event::DisplayElapsed(RecognitionSettings::default()));
        assert_eq!(m.state(), RecognitionState::Detecting);
        assert_eq!(m.retry_count(), 0);
    }

    #[test]
    fn test_stale_response_after_stop_is_ignored() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        step(&mut m, Event::Stop);
        let effects = step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: accepted(0.99),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(m.state(), RecognitionState::Idle);
    }

    #[test]
    fn test_stale_response_from_previous_attempt_is_ignored() {
        let mut m = started();
        let first = to_processing(&mut m);
        step(&mut m, Event::Stop);
        step(&mut m, Event::Start(RecognitionSettings::default()));
        let second = to_processing(&mut m);
        assert_ne!(first, second);

        let effects = step(
            &mut m,
            Event::Recognized {
                ticket: first,
                verdict: accepted(0.99),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(m.state(), RecognitionState::Processing);
    }

    #[test]
    fn test_stop_from_every_state_is_idle() {
        let drive: Vec<Box<dyn Fn(&mut Machine)>> = vec![
            Box::new(|_: &mut Machine| {}),
            Box::new(|m: &mut Machine| {
                step(m, Event::Start(RecognitionSettings::default()));
            }),
            Box::new(|m: &mut Machine| {
                step(m, Event::Start(RecognitionSettings::default()));
                signals(m, PRESENT, 12);
            }),
            Box::new(|m: &mut Machine| {
                step(m, Event::Start(RecognitionSettings::default()));
                signals(m, PRESENT, 15);
            }),
            Box::new(|m: &mut Machine| {
                step(m, Event::Start(RecognitionSettings::default()));
                to_processing(m);
            }),
            Box::new(|m: &mut Machine| {
                step(m, Event::Start(RecognitionSettings::default()));
                let ticket = to_processing(m);
                step(
                    m,
                    Event::Recognized {
                        ticket,
                        verdict: accepted(0.95),
                    },
                );
            }),
        ];

        for setup in drive {
            let mut m = Machine::default();
            setup(&mut m);
            let was_watching = m.state().is_watching();
            let effects = step(&mut m, Event::Stop);
            assert_eq!(m.state(), RecognitionState::Idle);
            assert_eq!(m.counter(), 0);
            if was_watching {
                assert!(effects.contains(&Effect::CancelReset));
                assert!(effects.contains(&Effect::ReleaseCamera));
            } else {
                assert!(effects.is_empty());
            }
            // Stopping again changes nothing.
            assert!(step(&mut m, Event::Stop).is_empty());
            assert_eq!(m.state(), RecognitionState::Idle);
        }
    }

    #[test]
    fn test_timer_after_stop_is_ignored() {
        let mut m = started();
        let ticket = to_processing(&mut m);
        step(
            &mut m,
            Event::Recognized {
                ticket,
                verdict: accepted(0.95),
            },
        );
        step(&mut m, Event::Stop);
        assert!(step(&mut m, Event::DisplayElapsed(RecognitionSettings::default())).is_empty());
        assert_eq!(m.state(), RecognitionState::Idle);
    }

    #[test]
    fn test_camera_lost_behaves_like_stop() {
        let mut m = started();
        signals(&mut m, PRESENT, 4);
        let effects = step(&mut m, Event::CameraLost);
        assert_eq!(m.state(), RecognitionState::Idle);
        assert!(effects.contains(&Effect::ReleaseCamera));
    }

    #[test]
    fn test_start_while_watching_is_ignored() {
        let mut m = started();
        signals(&mut m, PRESENT, 3);
        let effects = step(&mut m, Event::Start(RecognitionSettings::default()));
        assert!(effects.is_empty());
        assert_eq!(m.counter(), 3);
    }

    #[test]
    fn test_settings_snapshot_validated_on_start() {
        let mut m = Machine::default();
        step(
            &mut m,
            Event::Start(RecognitionSettings {
                confidence_threshold: 0.9,
                max_retry: 0,
            }),
        );
        assert_eq!(m.settings().max_retry, 1);
    }

    #[test]
    fn test_zero_margin_captures_at_threshold() {
        let mut m = Machine::new(MachineConfig {
            capture_margin: 0,
            ..MachineConfig::default()
        });
        step(&mut m, Event::Start(RecognitionSettings::default()));
        signals(&mut m, PRESENT, 10);
        assert_eq!(m.state(), RecognitionState::Capturing);
    }
}
