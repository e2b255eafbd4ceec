//! rollcall-core — Face-presence capture engine for attendance kiosks.
//!
//! Samples a presence signal from live frames, debounces it into a
//! stability counter, and drives the capture / recognize / retry state
//! machine. No I/O happens here: the daemon feeds events in and executes
//! the effects that come out.

pub mod capture;
pub mod machine;
pub mod presence;
pub mod recognition;
pub mod results;
pub mod session;
pub mod stability;
pub mod types;

pub use machine::{Effect, Event, Machine, MachineConfig, RecognitionState};
pub use presence::{PresenceProbe, PresenceSignal, VarianceProbe};
pub use recognition::{
    classify, RecognitionClient, RecognitionError, RecognitionSettings, Rejection,
    SettingsProvider, Verdict,
};
pub use results::ResultBuffer;
pub use session::{Session, SessionSnapshot};
pub use stability::StabilityTracker;
pub use types::{
    AttendanceRecord, MatchInfo, RecognitionOutcome, RecognitionResponse, ResponseStatus,
    SubjectKind,
};
