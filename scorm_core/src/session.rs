// Player state machine for one content-viewing session.
// Sans-IO: the host feeds it backend results, frame events and ticks, and
// drains the resulting events. player.rs drives it against a PersistenceClient.
//
//   Idle -> Loading -> Ready <-> ClosingConfirm -> Closed
//              |          \-> Completed -> Closed
//              \-> Error -> (retry) Loading

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::arbiter::{RewardArbiter, RewardOutcome, WatchLatch};
use crate::client::ProgressSink;
use crate::config::PlayerConfig;
use crate::error::{ClientError, SessionError};
use crate::frame::{ApiHandle, ApiHost};
use crate::observer::{observer_for, ProgressObserver, ProgressSample};
use crate::runtime::LmsRuntime;
use crate::types::{
    CompletionCheck, ContentKind, ContentRef, LaunchInfo, LearnerId, LessonStatus, SessionKey, Timestamp,
    WatchRecord, WatchStatus, WrapperEvent,
};

/// Lifecycle phase of the viewing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    ClosingConfirm,
    Completed,
    Error,
    Closed,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::ClosingConfirm => "confirming close",
            Phase::Completed => "completed",
            Phase::Error => "in error",
            Phase::Closed => "closed",
        }
    }

    fn is_open(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Closed)
    }
}

/// Coarse status the UI renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewingStatus {
    Loading,
    Ready,
    Error,
    Completed,
}

/// Identifies one open of the modal. Results carrying a stale ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTicket(u64);

/// Most recently observed LMS values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMirror {
    pub current_status: Option<String>,
    pub current_score: Option<f64>,
    pub max_score: Option<f64>,
    pub time_spent_seconds: f64,
    pub on_last_slide: bool,
    pub all_slides_viewed: bool,
}

/// Outbound notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    PhaseChanged { phase: Phase },
    LaunchReady { launch_url: String },
    Progress { mirror: ProgressMirror },
    DoneAvailable { available: bool },
    CompletionApproved {
        score: Option<f64>,
        reward: Option<RewardOutcome>,
        total_stars: Option<u32>,
    },
    /// Non-blocking banner with the server's reason.
    CompletionRejected { reason: String },
    /// Dismissible, retryable.
    CompletionCheckFailed { message: String },
    Reward { outcome: RewardOutcome, message: String },
    WatchStatus { status: WatchStatus },
    CloseConfirmationRequested,
    Closed { content: ContentRef },
    Failed { message: String, retryable: bool },
}

/// Work the host must perform after a tick or an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Followup {
    RecordWatch { request: WatchRequest },
    RefetchWatchStatus { ticket: SessionTicket, content: ContentRef },
}

/// A claimed "finished viewing" to send to `recordWatch`.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    pub ticket: SessionTicket,
    pub content: ContentRef,
    pub learner: LearnerId,
    pub completion_percent: f64,
}

/// Result of a user close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Closed,
    ConfirmationRequired,
}

/// One viewing session. Reset on close and on every `open`.
pub struct PlayerSession {
    config: PlayerConfig,
    learner: LearnerId,
    learner_name: String,
    generation: u64,
    phase: Phase,
    resume_phase: Phase,
    content: Option<ContentRef>,
    launch_url: Option<String>,
    runtime: Option<ApiHandle>,
    /// Finished runtimes whose final save still waits on saved progress.
    draining: Vec<ApiHandle>,
    observer: Option<Box<dyn ProgressObserver>>,
    mirror: ProgressMirror,
    completion_confirmed: bool,
    ready_at: Option<Timestamp>,
    done_check_in_flight: bool,
    done_available: bool,
    latch: WatchLatch,
    watch_before: Option<WatchStatus>,
    refetch_at: Option<Timestamp>,
    auto_close_at: Option<Timestamp>,
    last_error: Option<SessionError>,
    events: Vec<SessionEvent>,
}

impl PlayerSession {
    pub fn new(config: PlayerConfig, learner: LearnerId, learner_name: impl Into<String>) -> Self {
        PlayerSession {
            config,
            learner,
            learner_name: learner_name.into(),
            generation: 0,
            phase: Phase::Idle,
            resume_phase: Phase::Ready,
            content: None,
            launch_url: None,
            runtime: None,
            draining: Vec::new(),
            observer: None,
            mirror: ProgressMirror::default(),
            completion_confirmed: false,
            ready_at: None,
            done_check_in_flight: false,
            done_available: false,
            latch: WatchLatch::default(),
            watch_before: None,
            refetch_at: None,
            auto_close_at: None,
            last_error: None,
            events: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> Option<ViewingStatus> {
        match self.phase {
            Phase::Idle | Phase::Closed => None,
            Phase::Loading => Some(ViewingStatus::Loading),
            Phase::Error => Some(ViewingStatus::Error),
            Phase::Completed => Some(ViewingStatus::Completed),
            Phase::Ready | Phase::ClosingConfirm if self.completion_confirmed => {
                Some(ViewingStatus::Completed)
            }
            Phase::Ready | Phase::ClosingConfirm => Some(ViewingStatus::Ready),
        }
    }

    pub fn ticket(&self) -> SessionTicket {
        SessionTicket(self.generation)
    }

    pub fn is_current(&self, ticket: SessionTicket) -> bool {
        ticket.0 == self.generation && self.phase.is_open()
    }

    pub fn content(&self) -> Option<&ContentRef> {
        self.content.as_ref()
    }

    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    pub fn launch_url(&self) -> Option<&str> {
        self.launch_url.as_deref()
    }

    pub fn runtime(&self) -> Option<&ApiHandle> {
        self.runtime.as_ref()
    }

    pub fn mirror(&self) -> &ProgressMirror {
        &self.mirror
    }

    pub fn completion_confirmed(&self) -> bool {
        self.completion_confirmed
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn watch_before(&self) -> Option<&WatchStatus> {
        self.watch_before.as_ref()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Open `content`. Any session still open is torn down first.
    pub fn open(&mut self, content: ContentRef) -> SessionTicket {
        if self.phase.is_open() {
            debug!("new content selected; closing the current session");
            self.teardown();
        }
        self.reset();
        info!(content = %content.id, kind = content.kind.as_str(), "opening content");
        self.content = Some(content);
        self.set_phase(Phase::Loading);
        self.ticket()
    }

    /// Explicit user retry after a launch or injection failure.
    pub fn retry(&mut self) -> Result<SessionTicket, SessionError> {
        if self.phase != Phase::Error {
            return Err(self.invalid("retry"));
        }
        let content = self.content.clone().ok_or(SessionError::NoActiveSession)?;
        self.teardown_runtime();
        Ok(self.open(content))
    }

    pub fn launch_resolved(
        &mut self,
        ticket: SessionTicket,
        result: Result<LaunchInfo, ClientError>,
        now: Timestamp,
    ) {
        if !self.is_current(ticket) || self.phase != Phase::Loading {
            debug!("stale launch result dropped");
            return;
        }
        match result {
            Ok(info) => {
                self.launch_url = Some(info.launch_url.clone());
                self.events.push(SessionEvent::LaunchReady {
                    launch_url: info.launch_url,
                });
                let uses_runtime = self.content.as_ref().is_some_and(|c| c.kind.uses_lms_runtime());
                if !uses_runtime {
                    self.become_ready(now);
                }
            }
            Err(e) => {
                warn!(error = %e, "launch URL request failed");
                self.fail(SessionError::Launch(e));
            }
        }
    }

    /// The content frame finished loading: build a fresh runtime object, expose
    /// it to the frame, initialize it and start observing.
    pub fn attach_frame(
        &mut self,
        ticket: SessionTicket,
        host: &mut dyn ApiHost,
        sink: Rc<dyn ProgressSink>,
        now: Timestamp,
    ) -> Result<ApiHandle, SessionError> {
        if !self.is_current(ticket) {
            return Err(SessionError::NoActiveSession);
        }
        if self.phase != Phase::Loading || self.launch_url.is_none() {
            return Err(self.invalid("attach the content frame"));
        }
        let content = self.content.clone().ok_or(SessionError::NoActiveSession)?;

        let key = SessionKey::new(&content, self.learner.clone(), self.learner_name.clone());
        let runtime = LmsRuntime::new(key, sink)
            .with_debounce_ms(self.config.commit_debounce_ms)
            .with_seed_deadline(now.plus(self.config.seed_timeout_ms));
        let api: ApiHandle = Rc::new(RefCell::new(runtime));

        if let Err(e) = host.install(&api) {
            warn!(error = %e, "API injection failed");
            self.fail(e.clone());
            return Err(e);
        }
        if let Err(e) = host.mirror_to_parent(&api) {
            debug!(error = %e, "parent scope mirror skipped");
        }

        let initialized = api.borrow_mut().initialize();
        if !initialized {
            let code = api.borrow().last_error().code();
            let err = SessionError::InitializeRejected(code);
            self.fail(err.clone());
            return Err(err);
        }

        self.runtime = Some(Rc::clone(&api));
        self.observer = Some(observer_for(self.config.observer, self.config.poll_interval_ms, now));
        self.become_ready(now);
        Ok(api)
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Advance timers. Returns host work that came due.
    pub fn tick(&mut self, now: Timestamp) -> Vec<Followup> {
        let mut followups = Vec::new();
        self.draining.retain(|api| {
            let mut runtime = api.borrow_mut();
            runtime.poll(now);
            runtime.awaiting_seed()
        });
        if !self.phase.is_open() {
            return followups;
        }

        if let Some(runtime) = &self.runtime {
            runtime.borrow_mut().poll(now);
        }

        let sample = match (&mut self.observer, &self.runtime) {
            (Some(observer), Some(runtime)) => observer.on_tick(now, &runtime.borrow()),
            _ => None,
        };
        if let Some(sample) = sample {
            self.apply_sample(sample, now, &mut followups);
        }

        if self.refetch_at.is_some_and(|at| now >= at) {
            self.refetch_at = None;
            if let Some(content) = self.content.clone() {
                followups.push(Followup::RefetchWatchStatus {
                    ticket: self.ticket(),
                    content,
                });
            }
        }

        self.refresh_done_available(now);

        if self.auto_close_at.is_some_and(|at| now >= at) {
            info!("auto-closing completed content");
            self.close_now();
        }
        followups
    }

    /// A progress event pushed by a wrapper document.
    pub fn handle_message(&mut self, event: &WrapperEvent, now: Timestamp) -> Vec<Followup> {
        let mut followups = Vec::new();
        if !self.phase.is_open() {
            return followups;
        }
        let sample = self.observer.as_mut().and_then(|o| o.on_message(event));
        if let Some(sample) = sample {
            self.apply_sample(sample, now, &mut followups);
            self.refresh_done_available(now);
        }
        followups
    }

    fn apply_sample(&mut self, sample: ProgressSample, now: Timestamp, followups: &mut Vec<Followup>) {
        let finished = sample.lesson_status().is_some_and(|s| s.is_finished());
        if sample.status.is_some() {
            self.mirror.current_status = sample.status;
        }
        if sample.score.is_some() {
            self.mirror.current_score = sample.score;
        }
        if sample.max_score.is_some() {
            self.mirror.max_score = sample.max_score;
        }
        if let Some(seconds) = sample.time_spent_seconds {
            self.mirror.time_spent_seconds = seconds;
        }
        self.mirror.on_last_slide |= sample.on_last_slide;
        self.mirror.all_slides_viewed |= sample.all_slides_viewed;
        self.events.push(SessionEvent::Progress {
            mirror: self.mirror.clone(),
        });

        if finished && !self.config.policy.requires_explicit_done && !self.completion_confirmed {
            info!("lesson finished; completion confirmed locally");
            self.confirm_completion(now);
            if let Some(request) = self.claim_watch(100.0) {
                followups.push(Followup::RecordWatch { request });
            }
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    fn engaged_ms(&self, now: Timestamp) -> u64 {
        let wall = self.ready_at.map_or(0, |at| now.saturating_since(at));
        let reported = (self.mirror.time_spent_seconds * 1000.0) as u64;
        wall.max(reported)
    }

    /// Whether the "Done" action is enabled.
    pub fn can_mark_done(&self, now: Timestamp) -> bool {
        if !self.config.policy.requires_explicit_done
            || self.phase != Phase::Ready
            || self.done_check_in_flight
            || self.completion_confirmed
        {
            return false;
        }
        let finished = self
            .mirror
            .current_status
            .as_deref()
            .and_then(LessonStatus::parse)
            .is_some_and(|s| s.is_finished());
        finished || self.engaged_ms(now) >= self.config.min_engagement_ms
    }

    fn refresh_done_available(&mut self, now: Timestamp) {
        let available = self.can_mark_done(now);
        if available != self.done_available {
            self.done_available = available;
            self.events.push(SessionEvent::DoneAvailable { available });
        }
    }

    /// Start a "mark as done" backend check.
    pub fn begin_done_check(&mut self, now: Timestamp) -> Result<(SessionTicket, ContentRef), SessionError> {
        if !self.can_mark_done(now) {
            return Err(self.invalid("mark done"));
        }
        let content = self.content.clone().ok_or(SessionError::NoActiveSession)?;
        self.done_check_in_flight = true;
        self.refresh_done_available(now);
        // Everything recorded so far goes out before the backend judges it.
        if let Some(runtime) = &self.runtime {
            runtime.borrow_mut().commit();
        }
        Ok((self.ticket(), content))
    }

    pub fn completion_checked(
        &mut self,
        ticket: SessionTicket,
        result: Result<CompletionCheck, ClientError>,
        now: Timestamp,
    ) {
        if !self.is_current(ticket) {
            debug!("stale completion check dropped");
            return;
        }
        self.done_check_in_flight = false;
        match result {
            Ok(check) if check.can_complete => {
                info!(score = ?check.score, "completion approved");
                self.confirm_completion(now);
                let reward = RewardArbiter::from_completion(
                    self.watch_before.as_ref(),
                    check.stars_awarded,
                    check.stars_to_award,
                );
                let kind = self.content.as_ref().map(|c| c.kind);
                self.events.push(SessionEvent::CompletionApproved {
                    score: check.score,
                    reward: reward.clone(),
                    total_stars: check.total_stars,
                });
                if let (Some(outcome), Some(kind)) = (reward, kind) {
                    let message = outcome.message(kind);
                    self.events.push(SessionEvent::Reward { outcome, message });
                }
            }
            Ok(check) => {
                let reason = check
                    .reason
                    .unwrap_or_else(|| "This activity is not finished yet.".to_string());
                info!(%reason, "completion rejected");
                self.events.push(SessionEvent::CompletionRejected { reason });
            }
            Err(e) => {
                warn!(error = %e, "completion check failed");
                self.events.push(SessionEvent::CompletionCheckFailed {
                    message: e.to_string(),
                });
            }
        }
        self.refresh_done_available(now);
    }

    fn confirm_completion(&mut self, now: Timestamp) {
        self.completion_confirmed = true;
        match self.phase {
            Phase::ClosingConfirm => self.resume_phase = Phase::Completed,
            Phase::Ready => self.set_phase(Phase::Completed),
            _ => {}
        }
        if let Some(delay) = self.config.policy.auto_close_delay_ms {
            self.auto_close_at = Some(now.plus(delay));
        }
    }

    // =========================================================================
    // Repetition tracking
    // =========================================================================

    fn claim_watch(&mut self, completion_percent: f64) -> Option<WatchRequest> {
        let content = self.content.clone()?;
        if !self.latch.try_claim() {
            debug!("viewing already recorded for this session");
            return None;
        }
        Some(WatchRequest {
            ticket: self.ticket(),
            content,
            learner: self.learner.clone(),
            completion_percent,
        })
    }

    /// End-of-media (or enough-progress) signal. Returns the one `recordWatch`
    /// request this session is allowed to make.
    pub fn media_finished(&mut self, completion_percent: f64, now: Timestamp) -> Option<WatchRequest> {
        if !matches!(self.phase, Phase::Ready | Phase::Completed | Phase::ClosingConfirm) {
            return None;
        }
        if completion_percent < self.config.watched_threshold_percent {
            debug!(completion_percent, "below watched threshold");
            return None;
        }
        let request = self.claim_watch(completion_percent)?;
        // With explicit "Done" only a backend approval completes the session.
        if !self.config.policy.requires_explicit_done && !self.completion_confirmed {
            self.confirm_completion(now);
        }
        Some(request)
    }

    /// Status captured on open, before anything is recorded.
    pub fn watch_status_before(&mut self, ticket: SessionTicket, result: Result<WatchStatus, ClientError>) {
        if !self.is_current(ticket) {
            return;
        }
        if self.latch.is_claimed() {
            debug!("initial watch status arrived after recording; ignored");
            return;
        }
        match result {
            Ok(status) => {
                self.watch_before = Some(status);
                self.events.push(SessionEvent::WatchStatus { status });
            }
            Err(e) => warn!(error = %e, "initial watch status unavailable"),
        }
    }

    pub fn watch_recorded(
        &mut self,
        ticket: SessionTicket,
        result: Result<WatchRecord, ClientError>,
        now: Timestamp,
    ) {
        if !self.is_current(ticket) {
            return;
        }
        match result {
            Ok(record) => {
                let outcome = RewardArbiter::evaluate(self.watch_before.as_ref(), &record);
                let kind = self.content.as_ref().map_or(ContentKind::Video, |c| c.kind);
                let message = outcome.message(kind);
                self.events.push(SessionEvent::Reward { outcome, message });
                self.refetch_at = Some(now.plus(self.config.status_refetch_delay_ms));
            }
            Err(e) => {
                warn!(error = %e, "recording the viewing failed");
                self.events.push(SessionEvent::Failed {
                    message: e.to_string(),
                    retryable: false,
                });
            }
        }
    }

    /// Status re-read after a recorded viewing.
    pub fn watch_status_refreshed(&mut self, ticket: SessionTicket, result: Result<WatchStatus, ClientError>) {
        if !self.is_current(ticket) {
            return;
        }
        match result {
            Ok(status) => self.events.push(SessionEvent::WatchStatus { status }),
            Err(e) => debug!(error = %e, "watch status refresh failed"),
        }
    }

    // =========================================================================
    // Closing
    // =========================================================================

    pub fn request_close(&mut self) -> Result<CloseDecision, SessionError> {
        match self.phase {
            Phase::Idle | Phase::Closed => Err(SessionError::NoActiveSession),
            Phase::ClosingConfirm => Ok(CloseDecision::ConfirmationRequired),
            Phase::Ready if !self.completion_confirmed => {
                self.resume_phase = Phase::Ready;
                self.set_phase(Phase::ClosingConfirm);
                self.events.push(SessionEvent::CloseConfirmationRequested);
                Ok(CloseDecision::ConfirmationRequired)
            }
            _ => {
                self.close_now();
                Ok(CloseDecision::Closed)
            }
        }
    }

    /// "Stay" in the close confirmation dialog.
    pub fn cancel_close(&mut self, now: Timestamp) -> Result<(), SessionError> {
        if self.phase != Phase::ClosingConfirm {
            return Err(self.invalid("cancel closing"));
        }
        let resume = self.resume_phase;
        self.set_phase(resume);
        self.refresh_done_available(now);
        Ok(())
    }

    pub fn confirm_close(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::ClosingConfirm {
            return Err(self.invalid("confirm closing"));
        }
        self.close_now();
        Ok(())
    }

    fn close_now(&mut self) {
        let content = self.content.clone();
        self.teardown();
        self.reset();
        self.set_phase(Phase::Closed);
        if let Some(content) = content {
            info!(content = %content.id, "session closed");
            self.events.push(SessionEvent::Closed { content });
        }
    }

    /// Stop observation, save and finish the runtime, cancel every timer.
    fn teardown(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer.cancel();
        }
        self.observer = None;
        self.teardown_runtime();
        self.refetch_at = None;
        self.auto_close_at = None;
        self.generation += 1;
    }

    fn teardown_runtime(&mut self) {
        if let Some(api) = self.runtime.take() {
            let mut runtime = api.borrow_mut();
            if runtime.is_initialized() {
                if !runtime.commit() {
                    warn!(error = %runtime.get_diagnostic(""), "final commit failed");
                }
                runtime.finish();
            }
            runtime.cancel_timers();
            if runtime.is_finished() && runtime.awaiting_seed() {
                debug!("final save waits for saved progress");
                drop(runtime);
                self.draining.push(api);
            }
        }
    }

    /// Closed sessions whose final save has not gone out yet.
    pub fn has_pending_saves(&self) -> bool {
        !self.draining.is_empty()
    }

    fn reset(&mut self) {
        self.resume_phase = Phase::Ready;
        self.content = None;
        self.launch_url = None;
        self.runtime = None;
        self.observer = None;
        self.mirror = ProgressMirror::default();
        self.completion_confirmed = false;
        self.ready_at = None;
        self.done_check_in_flight = false;
        self.done_available = false;
        self.latch = WatchLatch::default();
        self.watch_before = None;
        self.refetch_at = None;
        self.auto_close_at = None;
        self.last_error = None;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn become_ready(&mut self, now: Timestamp) {
        self.ready_at = Some(now);
        self.set_phase(Phase::Ready);
        self.refresh_done_available(now);
    }

    fn fail(&mut self, error: SessionError) {
        self.events.push(SessionEvent::Failed {
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
        self.last_error = Some(error);
        self.set_phase(Phase::Error);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = self.phase.name(), to = phase.name(), "phase change");
            self.phase = phase;
            self.events.push(SessionEvent::PhaseChanged { phase });
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.phase.name(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::RecordingSink;
    use crate::cmi;
    use crate::config::CompletionPolicy;
    use crate::frame::testing::MemoryHost;
    use crate::observer::ObserverMode;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn launch() -> Result<LaunchInfo, ClientError> {
        Ok(LaunchInfo {
            launch_url: "https://cdn.example.org/pkg/index.html".into(),
        })
    }

    fn session(config: PlayerConfig) -> PlayerSession {
        PlayerSession::new(config, LearnerId::new("kid-7"), "Ada")
    }

    fn explicit_done() -> PlayerConfig {
        PlayerConfig {
            observer: ObserverMode::Messages,
            policy: CompletionPolicy {
                requires_explicit_done: true,
                auto_close_delay_ms: None,
            },
            ..PlayerConfig::default()
        }
    }

    /// Session in `Ready` with a seeded runtime.
    fn ready_session(config: PlayerConfig) -> (PlayerSession, ApiHandle, Rc<RecordingSink>) {
        let mut s = session(config);
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        s.launch_resolved(ticket, launch(), ts(0));
        let sink = Rc::new(RecordingSink::default());
        let mut host = MemoryHost::default();
        let api = s
            .attach_frame(ticket, &mut host, Rc::clone(&sink) as Rc<dyn ProgressSink>, ts(0))
            .unwrap();
        api.borrow_mut().seed_failed();
        (s, api, sink)
    }

    fn has_event(events: &[SessionEvent], pred: impl Fn(&SessionEvent) -> bool) -> bool {
        events.iter().any(pred)
    }

    #[test]
    fn open_launch_attach_reaches_ready() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        assert_eq!(s.phase(), Phase::Loading);
        assert_eq!(s.status(), Some(ViewingStatus::Loading));

        s.launch_resolved(ticket, launch(), ts(0));
        assert_eq!(s.phase(), Phase::Loading, "still loading until the frame reports in");
        assert_eq!(s.launch_url(), Some("https://cdn.example.org/pkg/index.html"));

        let sink: Rc<dyn ProgressSink> = Rc::new(RecordingSink::default());
        let mut host = MemoryHost::default();
        let api = s.attach_frame(ticket, &mut host, sink, ts(10)).unwrap();
        assert_eq!(s.phase(), Phase::Ready);
        assert!(api.borrow().is_initialized());

        let names: Vec<&str> = host.frame_globals.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["API", "API_1484_11"]);
        assert!(Rc::ptr_eq(&host.frame_globals[0].1, &host.frame_globals[1].1));
        assert!(Rc::ptr_eq(&host.frame_globals[0].1, &api));
        assert_eq!(host.parent_globals.len(), 2);
    }

    #[test]
    fn launch_failure_is_retryable() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        s.launch_resolved(ticket, Err(ClientError::NotFound("pkg-1".into())), ts(0));
        assert_eq!(s.phase(), Phase::Error);
        assert!(has_event(&s.drain_events(), |e| matches!(
            e,
            SessionEvent::Failed { retryable: true, .. }
        )));

        let retry = s.retry().unwrap();
        assert_ne!(retry, ticket);
        assert_eq!(s.phase(), Phase::Loading);
        assert_eq!(s.content().map(|c| c.id.as_str()), Some("pkg-1"));

        s.launch_resolved(ticket, launch(), ts(1));
        assert!(s.launch_url().is_none(), "result for the old ticket is stale");
        s.launch_resolved(retry, launch(), ts(2));
        assert!(s.launch_url().is_some());
    }

    #[test]
    fn injection_failure_enters_error() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        s.launch_resolved(ticket, launch(), ts(0));
        let mut host = MemoryHost {
            deny_frame: true,
            ..MemoryHost::default()
        };
        let sink: Rc<dyn ProgressSink> = Rc::new(RecordingSink::default());
        let err = s.attach_frame(ticket, &mut host, sink, ts(0)).unwrap_err();
        assert!(matches!(err, SessionError::Injection(_)));
        assert_eq!(s.phase(), Phase::Error);
        assert!(s.runtime().is_none());
    }

    #[test]
    fn parent_mirror_failure_is_ignored() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        s.launch_resolved(ticket, launch(), ts(0));
        let mut host = MemoryHost {
            deny_parent: true,
            ..MemoryHost::default()
        };
        let sink: Rc<dyn ProgressSink> = Rc::new(RecordingSink::default());
        assert!(s.attach_frame(ticket, &mut host, sink, ts(0)).is_ok());
        assert_eq!(s.phase(), Phase::Ready);
    }

    #[test]
    fn polling_updates_mirror_and_auto_completes() {
        let config = PlayerConfig {
            policy: CompletionPolicy {
                requires_explicit_done: false,
                auto_close_delay_ms: Some(3_000),
            },
            ..PlayerConfig::default()
        };
        let (mut s, api, _) = ready_session(config);
        api.borrow_mut().set_value(cmi::SCORE_RAW, "80", ts(100));
        api.borrow_mut().set_value(cmi::TOTAL_TIME, "00:01:10.00", ts(100));
        assert!(s.tick(ts(3_000)).is_empty());
        assert_eq!(s.mirror().current_score, Some(80.0));
        assert_eq!(s.mirror().time_spent_seconds, 70.0);
        assert!(!s.completion_confirmed());

        api.borrow_mut().set_value(cmi::LESSON_STATUS, "completed", ts(4_000));
        let followups = s.tick(ts(6_000));
        assert!(s.completion_confirmed());
        assert_eq!(s.phase(), Phase::Completed);
        assert!(matches!(
            followups.as_slice(),
            [Followup::RecordWatch { request }] if request.completion_percent == 100.0
        ));

        // Another finished sample must not claim a second viewing.
        assert!(s.tick(ts(9_000)).is_empty());
        assert_eq!(s.phase(), Phase::Closed, "auto-close fired");
        assert!(!api.borrow().is_initialized());
    }

    #[test]
    fn wrapper_flags_never_confirm_completion() {
        let (mut s, _, _) = ready_session(explicit_done());
        s.handle_message(
            &WrapperEvent {
                status: Some("incomplete".into()),
                is_last_slide: Some(true),
                all_slides_viewed: Some(true),
                ..WrapperEvent::default()
            },
            ts(1_000),
        );
        assert!(s.mirror().on_last_slide);
        assert!(!s.completion_confirmed());
        assert_eq!(s.phase(), Phase::Ready);
    }

    #[test]
    fn done_requires_minimum_engagement() {
        let (mut s, _, _) = ready_session(explicit_done());
        assert!(!s.can_mark_done(ts(59_999)));
        assert!(s.begin_done_check(ts(1_000)).is_err());
        assert!(s.can_mark_done(ts(60_000)));

        s.handle_message(
            &WrapperEvent {
                time_spent_seconds: Some(61.0),
                ..WrapperEvent::default()
            },
            ts(2_000),
        );
        assert!(s.can_mark_done(ts(2_000)), "reported time counts as engagement");
        assert!(has_event(&s.drain_events(), |e| matches!(
            e,
            SessionEvent::DoneAvailable { available: true }
        )));
    }

    #[test]
    fn approved_completion_awards_and_closes_without_confirmation() {
        let (mut s, _, _) = ready_session(explicit_done());
        let (ticket, content) = s.begin_done_check(ts(60_000)).unwrap();
        assert_eq!(content.id.as_str(), "pkg-1");
        assert!(!s.can_mark_done(ts(60_000)), "no double submit while checking");

        s.completion_checked(
            ticket,
            Ok(CompletionCheck {
                can_complete: true,
                score: Some(90.0),
                stars_awarded: Some(true),
                stars_to_award: Some(3),
                total_stars: Some(12),
                reason: None,
            }),
            ts(60_500),
        );
        assert_eq!(s.phase(), Phase::Completed);
        assert_eq!(s.status(), Some(ViewingStatus::Completed));
        let events = s.drain_events();
        assert!(has_event(&events, |e| matches!(
            e,
            SessionEvent::Reward { outcome: RewardOutcome::JustAwarded { stars: 3 }, .. }
        )));

        assert_eq!(s.request_close().unwrap(), CloseDecision::Closed);
        assert_eq!(s.phase(), Phase::Closed);
    }

    #[test]
    fn rejected_completion_keeps_ready_with_reason() {
        let (mut s, api, _) = ready_session(explicit_done());
        api.borrow_mut().set_value(cmi::SUSPEND_DATA, "slide=3", ts(10));
        let (ticket, _) = s.begin_done_check(ts(61_000)).unwrap();
        s.completion_checked(
            ticket,
            Ok(CompletionCheck {
                can_complete: false,
                reason: Some("Finish the quiz first".into()),
                ..CompletionCheck::default()
            }),
            ts(61_500),
        );
        assert_eq!(s.phase(), Phase::Ready);
        assert!(!s.completion_confirmed());
        assert!(has_event(&s.drain_events(), |e| matches!(
            e,
            SessionEvent::CompletionRejected { reason } if reason == "Finish the quiz first"
        )));
        assert_eq!(api.borrow().value_of(cmi::SUSPEND_DATA), "slide=3");
        assert!(s.can_mark_done(ts(62_000)), "learner may try again");
    }

    #[test]
    fn completion_check_failure_is_dismissible() {
        let (mut s, _, _) = ready_session(explicit_done());
        let (ticket, _) = s.begin_done_check(ts(60_000)).unwrap();
        s.completion_checked(ticket, Err(ClientError::Network("offline".into())), ts(60_100));
        assert_eq!(s.phase(), Phase::Ready);
        assert!(has_event(&s.drain_events(), |e| matches!(
            e,
            SessionEvent::CompletionCheckFailed { .. }
        )));
    }

    #[test]
    fn close_requires_confirmation_until_completed() {
        let (mut s, api, sink) = ready_session(explicit_done());
        api.borrow_mut().set_value(cmi::SUSPEND_DATA, "slide=2", ts(10));

        assert_eq!(s.request_close().unwrap(), CloseDecision::ConfirmationRequired);
        assert_eq!(s.phase(), Phase::ClosingConfirm);
        s.cancel_close(ts(20)).unwrap();
        assert_eq!(s.phase(), Phase::Ready);

        s.request_close().unwrap();
        s.confirm_close().unwrap();
        assert_eq!(s.phase(), Phase::Closed);
        assert_eq!(sink.count(), 1, "final commit on close");
        assert_eq!(sink.last().unwrap().suspend_data, "slide=2");
        assert!(!api.borrow().is_initialized());
        assert!(has_event(&s.drain_events(), |e| matches!(e, SessionEvent::Closed { .. })));
    }

    #[test]
    fn staying_re_enables_done_immediately() {
        let (mut s, _, _) = ready_session(explicit_done());
        s.tick(ts(60_000));
        assert!(s.can_mark_done(ts(60_000)));
        s.request_close().unwrap();
        s.tick(ts(60_100));
        assert!(has_event(&s.drain_events(), |e| matches!(
            e,
            SessionEvent::DoneAvailable { available: false }
        )));

        s.cancel_close(ts(60_200)).unwrap();
        assert!(has_event(&s.drain_events(), |e| matches!(
            e,
            SessionEvent::DoneAvailable { available: true }
        )));
    }

    #[test]
    fn approval_does_not_reannounce_stars_from_an_earlier_session() {
        let (mut s, _, _) = ready_session(explicit_done());
        let ticket = s.ticket();
        s.watch_status_before(
            ticket,
            Ok(WatchStatus {
                current_count: 1,
                required_count: 1,
                stars_awarded: true,
            }),
        );
        let (ticket, _) = s.begin_done_check(ts(60_000)).unwrap();
        s.completion_checked(
            ticket,
            Ok(CompletionCheck {
                can_complete: true,
                stars_awarded: Some(true),
                stars_to_award: Some(3),
                ..CompletionCheck::default()
            }),
            ts(60_500),
        );
        assert!(s.completion_confirmed());
        let events = s.drain_events();
        assert!(has_event(&events, |e| matches!(
            e,
            SessionEvent::Reward { outcome: RewardOutcome::AlreadyAwarded, .. }
        )));
        assert!(!has_event(&events, |e| matches!(
            e,
            SessionEvent::Reward { outcome: RewardOutcome::JustAwarded { .. }, .. }
        )));
    }

    #[test]
    fn writes_during_a_hung_progress_load_save_at_the_seed_deadline() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        s.launch_resolved(ticket, launch(), ts(0));
        let sink = Rc::new(RecordingSink::default());
        let mut host = MemoryHost::default();
        let api = s
            .attach_frame(ticket, &mut host, Rc::clone(&sink) as Rc<dyn ProgressSink>, ts(0))
            .unwrap();

        api.borrow_mut().set_value(cmi::LESSON_STATUS, "completed", ts(500));
        s.tick(ts(2_000));
        assert_eq!(sink.count(), 0, "held while saved progress may still arrive");
        s.tick(ts(10_000));
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.last().unwrap().lesson_status, "completed");
    }

    #[test]
    fn final_save_after_close_waits_for_the_seed_deadline() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("pkg-1", ContentKind::Scorm));
        s.launch_resolved(ticket, launch(), ts(0));
        let sink = Rc::new(RecordingSink::default());
        let mut host = MemoryHost::default();
        let api = s
            .attach_frame(ticket, &mut host, Rc::clone(&sink) as Rc<dyn ProgressSink>, ts(0))
            .unwrap();

        api.borrow_mut().set_value(cmi::SUSPEND_DATA, "slide=5", ts(100));
        s.request_close().unwrap();
        s.confirm_close().unwrap();
        assert!(api.borrow().is_finished());
        assert_eq!(sink.count(), 0);
        assert!(s.has_pending_saves());

        s.tick(ts(5_000));
        assert_eq!(sink.count(), 0);
        s.tick(ts(10_000));
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.last().unwrap().suspend_data, "slide=5");
        assert!(!s.has_pending_saves());
    }

    #[test]
    fn no_timer_fires_after_close() {
        let (mut s, api, sink) = ready_session(PlayerConfig::default());
        s.request_close().unwrap();
        // Package keeps writing from a frame that is going away.
        api.borrow_mut().set_value(cmi::SUSPEND_DATA, "late", ts(100));
        s.confirm_close().unwrap();
        let saves = sink.count();
        assert!(s.tick(ts(100_000)).is_empty());
        assert!(!api.borrow_mut().poll(ts(100_000)));
        assert_eq!(sink.count(), saves);
        assert_eq!(api.borrow().commit_due(), None);
    }

    #[test]
    fn opening_new_content_finishes_the_previous_runtime() {
        let (mut s, api, _) = ready_session(PlayerConfig::default());
        let old_ticket = s.ticket();
        let ticket = s.open(ContentRef::new("pkg-2", ContentKind::Scorm));
        assert_ne!(ticket, old_ticket);
        assert!(api.borrow().is_finished());
        assert!(s.runtime().is_none(), "a new session never reuses a store");
        assert!(!s.is_current(old_ticket));
    }

    #[test]
    fn duplicate_media_end_claims_one_recording() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("vid-1", ContentKind::Video));
        s.launch_resolved(ticket, launch(), ts(0));
        assert_eq!(s.phase(), Phase::Ready, "media needs no runtime");

        assert!(s.media_finished(50.0, ts(10)).is_none(), "below threshold");
        let first = s.media_finished(100.0, ts(20));
        let second = s.media_finished(100.0, ts(21));
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(s.completion_confirmed());
    }

    #[test]
    fn media_end_under_explicit_done_waits_for_approval() {
        let mut s = session(explicit_done());
        let ticket = s.open(ContentRef::new("vid-1", ContentKind::Video));
        s.launch_resolved(ticket, launch(), ts(0));

        assert!(s.media_finished(100.0, ts(20)).is_some());
        assert!(s.media_finished(100.0, ts(21)).is_none(), "latch still claimed once");
        assert!(!s.completion_confirmed());
        assert_eq!(s.phase(), Phase::Ready);
        assert!(s.can_mark_done(ts(60_000)));
    }

    #[test]
    fn watch_recording_uses_status_captured_before() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("vid-1", ContentKind::Video));
        s.launch_resolved(ticket, launch(), ts(0));
        s.watch_status_before(
            ticket,
            Ok(WatchStatus {
                current_count: 5,
                required_count: 5,
                stars_awarded: true,
            }),
        );
        let request = s.media_finished(100.0, ts(10)).unwrap();
        s.watch_recorded(
            request.ticket,
            Ok(WatchRecord {
                current_count: 6,
                required_count: 5,
                stars_awarded: true,
                stars_awarded_at: None,
                stars_to_award: 3,
            }),
            ts(20),
        );
        let events = s.drain_events();
        assert!(has_event(&events, |e| matches!(
            e,
            SessionEvent::Reward { outcome: RewardOutcome::AlreadyAwarded, .. }
        )));

        assert!(s.tick(ts(1_000)).is_empty());
        let followups = s.tick(ts(1_520));
        assert!(matches!(followups.as_slice(), [Followup::RefetchWatchStatus { .. }]));
    }

    #[test]
    fn late_before_status_is_ignored() {
        let mut s = session(PlayerConfig::default());
        let ticket = s.open(ContentRef::new("book-1", ContentKind::Book));
        s.launch_resolved(ticket, launch(), ts(0));
        s.media_finished(100.0, ts(5)).unwrap();
        s.watch_status_before(
            ticket,
            Ok(WatchStatus {
                current_count: 5,
                required_count: 5,
                stars_awarded: true,
            }),
        );
        assert!(s.watch_before().is_none());
    }

    #[test]
    fn invalid_transitions_are_reported() {
        let mut s = session(PlayerConfig::default());
        assert_eq!(s.request_close(), Err(SessionError::NoActiveSession));
        assert!(matches!(s.retry(), Err(SessionError::InvalidTransition { .. })));
        let ticket = s.open(ContentRef::new("pkg", ContentKind::Scorm));
        let sink: Rc<dyn ProgressSink> = Rc::new(RecordingSink::default());
        let mut host = MemoryHost::default();
        assert!(matches!(
            s.attach_frame(ticket, &mut host, sink, ts(0)),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert!(matches!(s.confirm_close(), Err(SessionError::InvalidTransition { .. })));
    }
}
