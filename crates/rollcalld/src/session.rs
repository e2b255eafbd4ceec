//! Session shell: runs the core state machine against a real camera,
//! a real recognizer and real timers.
//!
//! The shell lives on its own OS thread with a single-threaded tokio
//! runtime, so exactly one sampling tick, timer or response is handled at a
//! time. Every event goes through [`Session::apply`]; the returned effects
//! are executed before the next event is taken, which keeps retry bookkeeping
//! and counter resets atomic with respect to the sampling loop.

use crate::source::{CameraProvider, FrameSource};
use rollcall_core::capture::{self, CaptureError};
use rollcall_core::{
    Effect, Event, MachineConfig, PresenceProbe, RecognitionClient, RecognitionError,
    RecognitionOutcome, RecognitionResponse, Rejection, Session, SessionSnapshot,
    SettingsProvider, SubjectKind, VarianceProbe, Verdict,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("failed to start session runtime: {0}")]
    Runtime(std::io::Error),
    #[error("session thread exited")]
    ChannelClosed,
}

/// Runtime knobs for the shell.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub machine: MachineConfig,
    /// Cadence of the sampling loop.
    pub sample_interval: Duration,
    pub sample_window: u32,
    pub jpeg_quality: u8,
    pub result_capacity: usize,
    pub subject: Option<SubjectKind>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            sample_interval: Duration::from_millis(33),
            sample_window: rollcall_core::presence::DEFAULT_SAMPLE_WINDOW,
            jpeg_quality: capture::DEFAULT_JPEG_QUALITY,
            result_capacity: rollcall_core::results::DEFAULT_RESULT_CAPACITY,
            subject: None,
        }
    }
}

/// Status report returned to D-Bus callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub camera_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
}

/// Messages sent from D-Bus handlers to the session thread.
enum SessionRequest {
    Start {
        reply: oneshot::Sender<Result<Uuid, SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Results {
        reply: oneshot::Sender<Vec<RecognitionOutcome>>,
    },
}

/// Clone-safe handle to the session thread.
///
/// When the last handle is dropped the session stops and the camera is
/// released.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    /// Acquire the camera and begin watching. An active session is stopped
    /// first.
    pub async fn start(&self) -> Result<Uuid, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Start { reply }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Stop watching and release the camera. Safe to call in any state.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Stop { reply }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Status { reply }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Recent accepted recognitions, most recent first.
    pub async fn results(&self) -> Result<Vec<RecognitionOutcome>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Results { reply }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    async fn send(&self, req: SessionRequest) -> Result<(), SessionError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}

/// Spawn the session shell on a dedicated OS thread.
pub fn spawn_session<P>(
    provider: P,
    client: Arc<dyn RecognitionClient>,
    settings: Box<dyn SettingsProvider>,
    config: SessionConfig,
) -> Result<SessionHandle, SessionError>
where
    P: CameraProvider,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(SessionError::Runtime)?;

    let (tx, rx) = mpsc::channel::<SessionRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            let shell = Shell::new(provider, client, settings, config);
            runtime.block_on(shell.run(rx));
            tracing::info!("session thread exiting");
        })
        .map_err(SessionError::Runtime)?;

    Ok(SessionHandle { tx })
}

type RecognitionFuture =
    Pin<Box<dyn Future<Output = Result<RecognitionResponse, RecognitionError>> + Send>>;

/// An outstanding recognition call, tagged with the attempt it answers.
struct InFlight {
    ticket: u64,
    future: RecognitionFuture,
}

struct Shell<P: CameraProvider> {
    provider: P,
    client: Arc<dyn RecognitionClient>,
    settings: Box<dyn SettingsProvider>,
    probe: Box<dyn PresenceProbe>,
    config: SessionConfig,
    session: Session,
    source: Option<P::Source>,
    session_id: Option<Uuid>,
    sampling: bool,
    reset_at: Option<Instant>,
    encoded: Option<Vec<u8>>,
    in_flight: Option<InFlight>,
    last_error: Option<String>,
}

impl<P: CameraProvider> Shell<P> {
    fn new(
        provider: P,
        client: Arc<dyn RecognitionClient>,
        settings: Box<dyn SettingsProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            client,
            settings,
            probe: Box::new(VarianceProbe::new(config.sample_window)),
            session: Session::new(config.machine, config.result_capacity),
            config,
            source: None,
            session_id: None,
            sampling: false,
            reset_at: None,
            encoded: None,
            in_flight: None,
            last_error: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionRequest>) {
        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(req) => self.handle_request(req),
                    None => break,
                },
                _ = ticker.tick(), if self.sampling => self.sample_tick(),
                _ = sleep_until(self.reset_at), if self.reset_at.is_some() => {
                    self.reset_at = None;
                    self.next_episode();
                }
                (ticket, result) = await_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    let threshold = self.session.machine().settings().confidence_threshold;
                    let verdict = Verdict::from_result(result, threshold);
                    self.dispatch(Event::Recognized { ticket, verdict });
                }
            }
        }

        // Every handle is gone: tear down like an explicit stop.
        self.dispatch(Event::Stop);
    }

    fn handle_request(&mut self, req: SessionRequest) {
        match req {
            SessionRequest::Start { reply } => {
                let _ = reply.send(self.start());
            }
            SessionRequest::Stop { reply } => {
                if self.session.state().is_watching() {
                    tracing::info!(session = ?self.session_id, "stop requested");
                }
                self.dispatch(Event::Stop);
                let _ = reply.send(());
            }
            SessionRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SessionRequest::Results { reply } => {
                let _ = reply.send(self.session.results().to_vec());
            }
        }
    }

    fn start(&mut self) -> Result<Uuid, SessionError> {
        if self.session.state().is_watching() {
            tracing::info!(session = ?self.session_id, "restarting: stopping active session first");
            self.dispatch(Event::Stop);
        }

        let source = match self.provider.start() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "camera acquisition failed");
                self.last_error = Some(e.to_string());
                return Err(SessionError::Camera(e));
            }
        };
        self.source = Some(source);
        self.last_error = None;

        let settings = self.settings.load();
        let id = Uuid::new_v4();
        self.session_id = Some(id);
        tracing::info!(
            session = %id,
            confidence_threshold = settings.confidence_threshold,
            max_retry = settings.max_retry,
            "session started"
        );

        let effects = self.session.start(settings);
        self.run_effects(effects);
        Ok(id)
    }

    /// The result-display timer fired: read settings again so the next
    /// episode runs under whatever policy is current.
    fn next_episode(&mut self) {
        let settings = self.settings.load();
        tracing::debug!(
            session = ?self.session_id,
            confidence_threshold = settings.confidence_threshold,
            max_retry = settings.max_retry,
            "episode settings loaded"
        );
        self.dispatch(Event::DisplayElapsed(settings));
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id,
            camera_active: self.source.is_some(),
            last_error: self.last_error.clone(),
            snapshot: self.session.snapshot(),
        }
    }

    /// One sampling tick. A source with no frame ready skips the tick.
    fn sample_tick(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        match source.grab() {
            Ok(Some(frame)) => {
                if let Some(signal) = self.probe.probe(&frame.data, frame.width, frame.height) {
                    tracing::trace!(signal = signal.value(), "sampled");
                    self.dispatch(Event::Signal(signal));
                }
            }
            Ok(None) => tracing::trace!("frame not ready; tick skipped"),
            Err(e) => self.camera_lost(e),
        }
    }

    fn camera_lost(&mut self, error: rollcall_hw::CameraError) {
        tracing::error!(error = %error, session = ?self.session_id, "camera lost");
        self.last_error = Some(error.to_string());
        self.dispatch(Event::CameraLost);
    }

    fn dispatch(&mut self, event: Event) {
        let effects = self.session.apply(event);
        self.run_effects(effects);
    }

    /// Execute effects in order; follow-up events are fed back in FIFO order
    /// before control returns to the select loop.
    fn run_effects(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            if let Some(event) = self.execute(effect) {
                queue.extend(self.session.apply(event));
            }
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::StartSampling => {
                self.sampling = true;
                None
            }
            Effect::StopSampling => {
                self.sampling = false;
                None
            }
            Effect::Capture { ticket } => Some(self.capture(ticket)),
            Effect::Submit { ticket } => self.submit(ticket),
            Effect::ScheduleReset(after) => {
                self.reset_at = Some(Instant::now() + after);
                None
            }
            Effect::CancelReset => {
                self.reset_at = None;
                None
            }
            Effect::ReleaseCamera => {
                self.sampling = false;
                self.encoded = None;
                if self.in_flight.take().is_some() {
                    tracing::debug!("abandoning in-flight recognition call");
                }
                self.source = None;
                None
            }
            // Applied by `Session::apply`.
            Effect::Record(_) => None,
        }
    }

    fn capture(&mut self, ticket: u64) -> Event {
        let Some(source) = self.source.as_mut() else {
            return Event::CaptureFailed {
                ticket,
                reason: "no camera".into(),
            };
        };

        let frame = match source.grab() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Event::CaptureFailed {
                    ticket,
                    reason: CaptureError::NoFrame.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "camera lost during capture");
                self.last_error = Some(e.to_string());
                return Event::CameraLost;
            }
        };

        match capture::encode_jpeg(&frame.data, frame.width, frame.height, self.config.jpeg_quality) {
            Ok(jpeg) => {
                tracing::debug!(ticket, bytes = jpeg.len(), "frame captured");
                self.encoded = Some(jpeg);
                Event::Captured { ticket }
            }
            Err(e) => Event::CaptureFailed {
                ticket,
                reason: e.to_string(),
            },
        }
    }

    fn submit(&mut self, ticket: u64) -> Option<Event> {
        let Some(image) = self.encoded.take() else {
            return Some(Event::Recognized {
                ticket,
                verdict: Verdict::Rejected(Rejection::Capture("no encoded frame".into())),
            });
        };

        let client = Arc::clone(&self.client);
        let subject = self.config.subject;
        let future: RecognitionFuture =
            Box::pin(async move { client.recognize(&image, subject).await });
        self.in_flight = Some(InFlight { ticket, future });
        None
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn await_in_flight(
    slot: &mut Option<InFlight>,
) -> (u64, Result<RecognitionResponse, RecognitionError>) {
    match slot {
        Some(call) => {
            let result = call.future.as_mut().await;
            (call.ticket, result)
        }
        None => std::future::pending().await,
    }
}
