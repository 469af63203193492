// Async driver: runs a PlayerSession against a PersistenceClient.
// Every session borrow is released before an await; results are routed back
// with the ticket they were started under, so late answers for a closed
// session are dropped by the session itself.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::client::{ClientSink, PersistenceClient, ProgressSink, Spawner};
use crate::config::PlayerConfig;
use crate::error::{PlayerError, SessionError};
use crate::frame::{ApiHandle, ApiHost};
use crate::session::{CloseDecision, Followup, PlayerSession, SessionEvent, SessionTicket, WatchRequest};
use crate::types::{ContentRef, LearnerId, Timestamp, WrapperEvent};

/// Clock source. `Timestamp::now` in production, a settable cell in tests.
pub type Clock = Rc<dyn Fn() -> Timestamp>;

pub struct Player<C> {
    client: Rc<C>,
    session: Rc<RefCell<PlayerSession>>,
    spawner: Spawner,
    clock: Clock,
}

impl<C> Clone for Player<C> {
    fn clone(&self) -> Self {
        Player {
            client: Rc::clone(&self.client),
            session: Rc::clone(&self.session),
            spawner: Rc::clone(&self.spawner),
            clock: Rc::clone(&self.clock),
        }
    }
}

impl<C: PersistenceClient + 'static> Player<C> {
    pub fn new(
        client: Rc<C>,
        config: PlayerConfig,
        learner: LearnerId,
        learner_name: impl Into<String>,
        spawner: Spawner,
    ) -> Self {
        Player {
            client,
            session: Rc::new(RefCell::new(PlayerSession::new(config, learner, learner_name))),
            spawner,
            clock: Rc::new(Timestamp::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> Timestamp {
        (self.clock)()
    }

    /// Read access to the underlying state machine.
    pub fn session(&self) -> std::cell::Ref<'_, PlayerSession> {
        self.session.borrow()
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.session.borrow_mut().drain_events()
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Open `content` and resolve its launch URL.
    pub async fn open(&self, content: ContentRef) {
        let ticket = self.session.borrow_mut().open(content.clone());
        self.load(ticket, content).await;
    }

    /// User retry after a launch or injection failure.
    pub async fn retry(&self) -> Result<(), PlayerError> {
        let ticket = self.session.borrow_mut().retry()?;
        let content = self
            .session
            .borrow()
            .content()
            .cloned()
            .ok_or(SessionError::NoActiveSession)?;
        self.load(ticket, content).await;
        Ok(())
    }

    async fn load(&self, ticket: SessionTicket, content: ContentRef) {
        let learner = self.session.borrow().learner().clone();

        // Repetition status before anything of this session is recorded. It
        // never holds up the launch.
        let status = async {
            let before = self.client.watch_status(&content, &learner).await;
            self.session.borrow_mut().watch_status_before(ticket, before);
        };
        let launch = async {
            let launch = self.client.launch_url(&content).await;
            let now = self.now();
            self.session.borrow_mut().launch_resolved(ticket, launch, now);
        };
        futures::join!(status, launch);
    }

    /// The content frame loaded: expose the runtime, initialize it and apply
    /// the learner's saved progress once it arrives.
    pub async fn attach_frame(&self, host: &mut dyn ApiHost) -> Result<ApiHandle, PlayerError> {
        let sink: Rc<dyn ProgressSink> = Rc::new(ClientSink::new(
            Rc::clone(&self.client),
            Rc::clone(&self.spawner),
        ));
        let now = self.now();
        let api = {
            let mut session = self.session.borrow_mut();
            let ticket = session.ticket();
            session.attach_frame(ticket, host, sink, now)?
        };

        let key = api.borrow().key().clone();
        let progress = self.client.load_progress(&key).await;
        // Seed even if the session closed meanwhile: a held final commit is
        // only released once saved progress has been merged in.
        match progress {
            Ok(progress) => api.borrow_mut().seed(progress),
            Err(e) => {
                warn!(error = %e, "loading saved progress failed");
                api.borrow_mut().seed_failed();
            }
        }
        Ok(api)
    }

    // =========================================================================
    // Observation and completion
    // =========================================================================

    /// Host timer tick. Due backend work is spawned.
    pub fn tick(&self) {
        let now = self.now();
        let followups = self.session.borrow_mut().tick(now);
        self.spawn_followups(followups);
    }

    /// Wrapper `postMessage` payload, already origin-checked by the caller.
    pub fn handle_message(&self, event: &WrapperEvent) {
        let now = self.now();
        let followups = self.session.borrow_mut().handle_message(event, now);
        self.spawn_followups(followups);
    }

    pub fn can_mark_done(&self) -> bool {
        self.session.borrow().can_mark_done(self.now())
    }

    /// "Done" pressed: ask the backend to approve completion.
    pub async fn mark_done(&self) -> Result<(), PlayerError> {
        let now = self.now();
        let (ticket, content) = self.session.borrow_mut().begin_done_check(now)?;
        let result = self.client.check_completion(&content).await;
        let now = self.now();
        self.session.borrow_mut().completion_checked(ticket, result, now);
        Ok(())
    }

    /// End of playback (or the watched threshold reached).
    pub async fn media_finished(&self, completion_percent: f64) {
        let now = self.now();
        let request = self.session.borrow_mut().media_finished(completion_percent, now);
        if let Some(request) = request {
            self.record_watch(request).await;
        }
    }

    async fn record_watch(&self, request: WatchRequest) {
        debug!(content = %request.content.id, percent = request.completion_percent, "recording viewing");
        let result = self
            .client
            .record_watch(&request.content, &request.learner, request.completion_percent)
            .await;
        let now = self.now();
        self.session
            .borrow_mut()
            .watch_recorded(request.ticket, result, now);
    }

    async fn refetch_watch_status(&self, ticket: SessionTicket, content: ContentRef) {
        let learner = self.session.borrow().learner().clone();
        let result = self.client.watch_status(&content, &learner).await;
        self.session.borrow_mut().watch_status_refreshed(ticket, result);
    }

    fn spawn_followups(&self, followups: Vec<Followup>) {
        for followup in followups {
            let player = self.clone();
            (self.spawner)(Box::pin(async move {
                match followup {
                    Followup::RecordWatch { request } => player.record_watch(request).await,
                    Followup::RefetchWatchStatus { ticket, content } => {
                        player.refetch_watch_status(ticket, content).await
                    }
                }
            }));
        }
    }

    // =========================================================================
    // Closing
    // =========================================================================

    pub fn request_close(&self) -> Result<CloseDecision, PlayerError> {
        Ok(self.session.borrow_mut().request_close()?)
    }

    pub fn cancel_close(&self) -> Result<(), PlayerError> {
        let now = self.now();
        Ok(self.session.borrow_mut().cancel_close(now)?)
    }

    pub fn confirm_close(&self) -> Result<(), PlayerError> {
        Ok(self.session.borrow_mut().confirm_close()?)
    }
}
