use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use time::Date;
use tokio::{
    sync::{broadcast, mpsc::UnboundedReceiver, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    error::{ApiError, DecoderError, SessionError},
    integrations::{
        api::ConsoleApi,
        camera::CameraDevice,
        decoder::ContinuousDecoder,
        feedback::FeedbackSink,
    },
    send_message, ActorRef, Rto, Scanner,
};

use super::{
    debounce::ScanDebouncer,
    event::{resolve_active, Event},
    participant::AttendanceResult,
    session::Session,
};

/// Where the check-in workflow currently is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "detail")]
pub enum Phase {
    Idle,
    /// Scanning cannot start; the reason is shown to the operator.
    Blocked(String),
    Scanning,
    Submitting(String),
    Fetching(String),
    Displaying(String),
    Error(String),
    Stopped,
}

/// Everything the kiosk screen shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    pub phase: Phase,
    pub event: Option<Event>,
    pub participant: Option<AttendanceResult>,
    pub error: Option<String>,
    pub loading: bool,
    /// Latest accepted scan
    pub cycle: u64,
    /// Scan whose outcome is on screen
    pub shown_cycle: u64,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            event: None,
            participant: None,
            error: None,
            loading: false,
            cycle: 0,
            shown_cycle: 0,
        }
    }
}

/// Published display state plus the transition feed.
///
/// Once unmounted, nothing writes to the display again.
pub struct Display {
    state: watch::Sender<DisplayState>,
    transitions: broadcast::Sender<Phase>,
    mounted: AtomicBool,
}

impl Display {
    pub fn new() -> Self {
        let (state, _) = watch::channel(DisplayState::default());
        let (transitions, _) = broadcast::channel(64);
        Self {
            state,
            transitions,
            mounted: AtomicBool::new(true),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.state.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<Phase> {
        self.transitions.subscribe()
    }

    pub fn snapshot(&self) -> DisplayState {
        self.state.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    fn announce(&self, phase: &Phase) {
        // No subscribers is fine
        let _ = self.transitions.send(phase.clone());
    }

    /// Moves to `phase` and lets `f` adjust the rest of the state. `f`
    /// returning false drops the update entirely.
    fn update<F>(&self, phase: Phase, f: F) -> bool
    where
        F: FnOnce(&mut DisplayState) -> bool,
    {
        if !self.is_mounted() {
            return false;
        }

        let applied = self.state.send_if_modified(|state| {
            if !f(state) {
                return false;
            }
            state.phase = phase.clone();
            true
        });
        if applied {
            self.announce(&phase);
        }
        applied
    }

    fn set_phase(&self, phase: Phase) {
        self.update(phase, |_| true);
    }

    fn block(&self, reason: &SessionError) {
        let message = blocked_message(reason);
        log::warn!("Scanning blocked: {}", message);
        self.update(Phase::Blocked(message.clone()), |state| {
            state.error = Some(message);
            state.loading = false;
            true
        });
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

fn blocked_message(reason: &SessionError) -> String {
    match reason {
        SessionError::Camera(e) => format!("Error starting scanner: {}", e),
        other => other.to_string(),
    }
}

/// Requests handled by the check-in actor.
pub enum CheckInRequest {
    /// A decoded or manually entered payload. Replies whether it started a cycle.
    Scan(String, Rto<bool>),
    GetDisplay(Rto<DisplayState>),
    /// The decode loop ended because the camera went away.
    CameraLost(DecoderError, Rto<()>),
    Stop(Rto<()>),
}

pub type CheckInActor = ActorRef<CheckInRequest>;

/// Debounced attendance workflow for one scanning session and one event.
pub struct CheckInPipeline {
    api: Arc<dyn ConsoleApi>,
    feedback: Arc<dyn FeedbackSink>,
    debouncer: ScanDebouncer,
    cooldown: Duration,
    event: Event,
    display: Arc<Display>,
    cycles: AtomicU64,
}

impl CheckInPipeline {
    pub fn new(
        api: Arc<dyn ConsoleApi>,
        feedback: Arc<dyn FeedbackSink>,
        event: Event,
        cooldown: Duration,
        display: Arc<Display>,
    ) -> Self {
        Self {
            api,
            feedback,
            debouncer: ScanDebouncer::new(),
            cooldown,
            event,
            display,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Shows `reason` for good. Later scans and in-flight results are ignored.
    pub fn halt(&self, reason: &SessionError) {
        self.display.block(reason);
        self.display.unmount();
        self.feedback.cancel();
    }

    /// Gates `payload` through the debouncer and, when accepted, starts a
    /// submit/fetch cycle in the background. The write is never cancelled
    /// once dispatched.
    pub fn accept(self: &Arc<Self>, payload: &str) -> Option<JoinHandle<()>> {
        let subject = payload.trim();
        if subject.is_empty() || !self.display.is_mounted() {
            return None;
        }
        if !self
            .debouncer
            .should_process(subject, Instant::now(), self.cooldown)
        {
            log::debug!("Ignoring repeat scan of {}", subject);
            return None;
        }

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Scan {} accepted: {}", cycle, subject);

        self.feedback.play_tone();
        self.display
            .update(Phase::Submitting(subject.to_owned()), |state| {
                state.participant = None;
                state.error = None;
                state.loading = true;
                state.cycle = cycle;
                true
            });

        let pipeline = self.clone();
        let subject = subject.to_owned();
        Some(tokio::spawn(async move {
            pipeline.run_cycle(cycle, subject).await;
        }))
    }

    async fn run_cycle(&self, cycle: u64, subject: String) {
        let event_id = self.event.id.as_deref().unwrap_or_default();

        if let Err(e) = self.api.create_attendance(&subject, event_id).await {
            self.fail(cycle, &subject, e);
            return;
        }
        self.display.update(Phase::Fetching(subject.clone()), |state| {
            state.cycle <= cycle
        });

        match self.api.attendance_summary(&subject).await {
            Ok(result) => self.show(cycle, &subject, result),
            Err(e) => self.fail(cycle, &subject, e),
        }
    }

    fn show(&self, cycle: u64, subject: &str, result: AttendanceResult) {
        if !self.display.is_mounted() {
            log::debug!("Check-in of {} finished after unmount", subject);
            return;
        }

        let greeting = format!("Your ID has been scanned, {}", result.greeting_name());
        let shown = self
            .display
            .update(Phase::Displaying(subject.to_owned()), |state| {
                if state.shown_cycle > cycle {
                    return false;
                }
                state.participant = Some(result);
                state.error = None;
                state.shown_cycle = cycle;
                state.loading = state.cycle > cycle;
                true
            });

        if shown {
            log::info!("Checked in {}", subject);
            self.feedback.speak(&greeting);
            self.display.set_phase(Phase::Scanning);
        } else {
            log::debug!("Dropping stale result for scan {} ({})", cycle, subject);
        }
    }

    fn fail(&self, cycle: u64, subject: &str, error: ApiError) {
        let message = error.to_string();
        log::warn!("Check-in of {} failed: {}", subject, message);

        if !self.display.is_mounted() {
            return;
        }

        let shown = self.display.update(Phase::Error(message.clone()), |state| {
            if state.shown_cycle > cycle {
                return false;
            }
            state.participant = None;
            state.error = Some(message.clone());
            state.shown_cycle = cycle;
            state.loading = state.cycle > cycle;
            true
        });

        if shown {
            self.feedback.speak(&message);
            self.display.set_phase(Phase::Scanning);
        } else {
            log::debug!("Dropping stale error for scan {} ({})", cycle, subject);
        }
    }
}

pub async fn run_checkin_actor(
    pipeline: Arc<CheckInPipeline>,
    mut rx: UnboundedReceiver<CheckInRequest>,
) -> Result<(), anyhow::Error> {
    log::debug!("Started check-in actor");
    while let Some(msg) = rx.recv().await {
        match msg {
            CheckInRequest::Scan(payload, rto) => {
                rto.reply(Ok(pipeline.accept(&payload).is_some()));
            }
            CheckInRequest::GetDisplay(rto) => {
                rto.reply(Ok(pipeline.display.snapshot()));
            }
            CheckInRequest::CameraLost(e, rto) => {
                pipeline.halt(&SessionError::Camera(e));
                rto.reply(Ok(()));
            }
            CheckInRequest::Stop(rto) => {
                log::debug!("Stopping check-in actor");
                rto.reply(Ok(()));
                break;
            }
        }
    }

    Ok(())
}

/// Inputs for a scanning session that do not come from the environment.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub cooldown: Duration,
    pub frame_interval: Duration,
    pub today: Date,
}

/// A mounted scanning screen: token check, event resolution, camera and
/// the check-in actor, torn down together.
pub struct ScanSession {
    display: Arc<Display>,
    feedback: Arc<dyn FeedbackSink>,
    actor: Option<CheckInActor>,
    decoder: Option<ContinuousDecoder>,
    blocked: Option<SessionError>,
    event: Option<Event>,
    stopped: bool,
}

impl ScanSession {
    /// A session that never got past authorization.
    pub fn blocked(reason: SessionError, feedback: Arc<dyn FeedbackSink>) -> Self {
        let display = Arc::new(Display::new());
        display.block(&reason);
        Self {
            display,
            feedback,
            actor: None,
            decoder: None,
            blocked: Some(reason),
            event: None,
            stopped: false,
        }
    }

    /// Mounts the scanner. Never fails: any condition that keeps scanning
    /// from starting leaves the session in a blocked display state.
    pub async fn start<C: CameraDevice>(
        session: &Session,
        api: Arc<dyn ConsoleApi>,
        feedback: Arc<dyn FeedbackSink>,
        camera: C,
        options: ScanOptions,
    ) -> Self {
        let mut this = Self {
            display: Arc::new(Display::new()),
            feedback: feedback.clone(),
            actor: None,
            decoder: None,
            blocked: None,
            event: None,
            stopped: false,
        };

        if let Err(e) = session.check() {
            return this.block(e);
        }

        let event = match api.active_events().await {
            Ok(events) => match resolve_active(&events, options.today) {
                Some(event) => event.clone(),
                None => return this.block(SessionError::NoActiveEvent),
            },
            Err(e) => return this.block(SessionError::EventsUnavailable(e.to_string())),
        };
        log::info!("Active event: {}", event.name);

        this.display.update(Phase::Idle, |state| {
            state.event = Some(event.clone());
            true
        });

        let pipeline = Arc::new(CheckInPipeline::new(
            api,
            feedback,
            event.clone(),
            options.cooldown,
            this.display.clone(),
        ));
        let (actor, rx) = CheckInActor::new();
        tokio::spawn(async move {
            if let Err(e) = run_checkin_actor(pipeline, rx).await {
                log::error!("Check-in actor failed: {:#}", e);
            }
        });

        let decoded = actor.clone();
        let faulted = actor.clone();
        let decoder = ContinuousDecoder::start(
            camera,
            options.frame_interval,
            move |payload| {
                let (tx, _) = oneshot::channel();
                if !decoded.send(CheckInRequest::Scan(payload, Rto::new(tx))) {
                    log::debug!("Decoded payload after check-in actor stopped");
                }
            },
            move |e| {
                let (tx, _) = oneshot::channel();
                faulted.send(CheckInRequest::CameraLost(e, Rto::new(tx)));
            },
        );

        match decoder {
            Ok(decoder) => {
                this.decoder = Some(decoder);
                this.actor = Some(actor);
                this.event = Some(event);
                this.display.set_phase(Phase::Scanning);
                this
            }
            Err(e) => {
                let (tx, _) = oneshot::channel();
                actor.send(CheckInRequest::Stop(Rto::new(tx)));
                this.block(SessionError::Camera(e))
            }
        }
    }

    fn block(mut self, reason: SessionError) -> Self {
        self.display.block(&reason);
        self.blocked = Some(reason);
        self
    }

    pub fn blocked_reason(&self) -> Option<&SessionError> {
        self.blocked.as_ref()
    }

    /// False once the camera is lost, even before `shutdown`.
    pub fn is_scanning(&self) -> bool {
        self.decoder.as_ref().is_some_and(|d| d.is_running())
            && self.display.is_mounted()
            && !self.stopped
    }

    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    pub fn display(&self) -> Arc<Display> {
        self.display.clone()
    }

    pub fn actor(&self) -> Option<CheckInActor> {
        self.actor.clone()
    }

    /// Handles for the display server.
    pub fn scanner(&self) -> Scanner {
        Scanner {
            display: self.display.clone(),
            checkin_actor: self.actor.clone(),
        }
    }

    /// Feeds a payload into the pipeline as if it had been decoded.
    pub async fn submit(&self, payload: &str) -> anyhow::Result<bool> {
        match &self.actor {
            Some(actor) => send_message!(actor, CheckInRequest, Scan, payload.to_owned()),
            None => Err(anyhow::anyhow!("Scanner is not running")),
        }
    }

    /// Releases the camera and silences feedback. In-flight attendance
    /// writes still complete but no longer touch the display.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
        }
        self.display.set_phase(Phase::Stopped);
        self.display.unmount();
        self.feedback.cancel();

        if let Some(actor) = self.actor.take() {
            let (tx, _) = oneshot::channel();
            actor.send(CheckInRequest::Stop(Rto::new(tx)));
        }
        log::info!("Scan session closed");
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
