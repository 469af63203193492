// Persistence client boundary: the backend operations the player consumes,
// and the fire-and-forget save path the LMS runtime commits through.

use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::types::{
    CompletionCheck, ContentRef, LaunchInfo, LearnerId, ProgressSnapshot, SessionKey,
    StoredProgress, WatchRecord, WatchStatus,
};

/// Backend operations. Single-threaded: futures are not `Send`.
#[async_trait(?Send)]
pub trait PersistenceClient {
    /// Launch URL for a content item. Fails with `NotFound` or `Server`.
    async fn launch_url(&self, content: &ContentRef) -> Result<LaunchInfo, ClientError>;

    /// The learner's saved progress; any subset of fields may be absent.
    async fn load_progress(&self, key: &SessionKey) -> Result<StoredProgress, ClientError>;

    /// Persist a progress snapshot.
    async fn save_progress(
        &self,
        key: &SessionKey,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), ClientError>;

    /// Ask the backend whether the learner may mark the content as done.
    async fn check_completion(&self, content: &ContentRef) -> Result<CompletionCheck, ClientError>;

    /// Record one finished viewing. Callers must invoke this at most once per session.
    async fn record_watch(
        &self,
        content: &ContentRef,
        learner: &LearnerId,
        completion_percent: f64,
    ) -> Result<WatchRecord, ClientError>;

    /// Read-only repetition progress.
    async fn watch_status(
        &self,
        content: &ContentRef,
        learner: &LearnerId,
    ) -> Result<WatchStatus, ClientError>;
}

/// Completion callback for a submitted save.
pub type SaveAck = Box<dyn FnOnce(Result<(), ClientError>)>;

/// Fire-and-forget save transport used by the LMS runtime.
///
/// `submit` must return promptly; the save itself may finish later and report
/// through `ack`. An `Err` from `submit` means nothing was sent.
pub trait ProgressSink {
    fn submit(
        &self,
        key: &SessionKey,
        snapshot: ProgressSnapshot,
        ack: SaveAck,
    ) -> Result<(), ClientError>;
}

/// Executor hook for background work (`spawn_local` in the browser).
pub type Spawner = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

/// Adapts a `PersistenceClient` into a `ProgressSink` by spawning each save.
pub struct ClientSink<C> {
    client: Rc<C>,
    spawner: Spawner,
}

impl<C> ClientSink<C> {
    pub fn new(client: Rc<C>, spawner: Spawner) -> Self {
        ClientSink { client, spawner }
    }
}

impl<C: PersistenceClient + 'static> ProgressSink for ClientSink<C> {
    fn submit(
        &self,
        key: &SessionKey,
        snapshot: ProgressSnapshot,
        ack: SaveAck,
    ) -> Result<(), ClientError> {
        let client = Rc::clone(&self.client);
        let key = key.clone();
        (self.spawner)(Box::pin(async move {
            let result = client.save_progress(&key, &snapshot).await;
            match &result {
                Ok(()) => debug!(content = %key.content_id, status = %snapshot.lesson_status, "progress saved"),
                Err(e) => warn!(content = %key.content_id, error = %e, "progress save failed"),
            }
            ack(result);
        }));
        Ok(())
    }
}

/// Save bookkeeping shared between a runtime and the acks of its in-flight saves.
///
/// Revisions count successful writes; a revision is confirmed once a save that
/// carried it has been acknowledged.
#[derive(Debug, Default)]
pub struct SaveLedger {
    confirmed: Cell<u64>,
    last_failed: Cell<bool>,
}

impl SaveLedger {
    pub fn new() -> Rc<Self> {
        Rc::new(SaveLedger::default())
    }

    pub fn confirmed(&self) -> u64 {
        self.confirmed.get()
    }

    /// Whether the most recent acknowledged save failed.
    pub fn last_failed(&self) -> bool {
        self.last_failed.get()
    }

    /// Ack closure for a save carrying `revision`.
    pub fn ack_for(self: &Rc<Self>, revision: u64) -> SaveAck {
        let ledger = Rc::clone(self);
        Box::new(move |result| match result {
            Ok(()) => {
                if revision > ledger.confirmed.get() {
                    ledger.confirmed.set(revision);
                }
                ledger.last_failed.set(false);
            }
            Err(_) => ledger.last_failed.set(true),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory doubles shared by the runtime, session and player tests.

    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Sink that records submissions and acknowledges them immediately.
    #[derive(Default)]
    pub struct RecordingSink {
        pub saves: RefCell<Vec<ProgressSnapshot>>,
        pub fail_acks: Cell<bool>,
        pub reject_submit: Cell<bool>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.saves.borrow().len()
        }

        pub fn last(&self) -> Option<ProgressSnapshot> {
            self.saves.borrow().last().cloned()
        }
    }

    impl ProgressSink for RecordingSink {
        fn submit(
            &self,
            _key: &SessionKey,
            snapshot: ProgressSnapshot,
            ack: SaveAck,
        ) -> Result<(), ClientError> {
            if self.reject_submit.get() {
                return Err(ClientError::Rejected("offline".into()));
            }
            self.saves.borrow_mut().push(snapshot);
            if self.fail_acks.get() {
                ack(Err(ClientError::Network("timeout".into())));
            } else {
                ack(Ok(()));
            }
            Ok(())
        }
    }

    /// Scripted backend. Queued responses are consumed in order; calls are counted.
    #[derive(Default)]
    pub struct FakeClient {
        pub launch: RefCell<VecDeque<Result<LaunchInfo, ClientError>>>,
        pub progress: RefCell<Option<Result<StoredProgress, ClientError>>>,
        pub completion: RefCell<VecDeque<Result<CompletionCheck, ClientError>>>,
        pub watch_records: RefCell<VecDeque<Result<WatchRecord, ClientError>>>,
        pub statuses: RefCell<VecDeque<Result<WatchStatus, ClientError>>>,
        pub saved: RefCell<Vec<ProgressSnapshot>>,
        pub launch_calls: Cell<usize>,
        pub record_calls: Cell<usize>,
        pub status_calls: Cell<usize>,
        pub completion_calls: Cell<usize>,
        /// Never answer `load_progress`.
        pub hang_progress: Cell<bool>,
        /// Never answer `watch_status`.
        pub hang_status: Cell<bool>,
    }

    #[async_trait(?Send)]
    impl PersistenceClient for FakeClient {
        async fn launch_url(&self, _content: &ContentRef) -> Result<LaunchInfo, ClientError> {
            self.launch_calls.set(self.launch_calls.get() + 1);
            self.launch.borrow_mut().pop_front().unwrap_or_else(|| {
                Ok(LaunchInfo {
                    launch_url: "https://cdn.example.org/pkg/index.html".into(),
                })
            })
        }

        async fn load_progress(&self, _key: &SessionKey) -> Result<StoredProgress, ClientError> {
            if self.hang_progress.get() {
                futures::future::pending::<()>().await;
            }
            self.progress
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Ok(StoredProgress::default()))
        }

        async fn save_progress(
            &self,
            _key: &SessionKey,
            snapshot: &ProgressSnapshot,
        ) -> Result<(), ClientError> {
            self.saved.borrow_mut().push(snapshot.clone());
            Ok(())
        }

        async fn check_completion(&self, _content: &ContentRef) -> Result<CompletionCheck, ClientError> {
            self.completion_calls.set(self.completion_calls.get() + 1);
            self.completion
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Server { status: 500, message: "unscripted".into() }))
        }

        async fn record_watch(
            &self,
            _content: &ContentRef,
            _learner: &LearnerId,
            _completion_percent: f64,
        ) -> Result<WatchRecord, ClientError> {
            self.record_calls.set(self.record_calls.get() + 1);
            self.watch_records
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Server { status: 500, message: "unscripted".into() }))
        }

        async fn watch_status(
            &self,
            _content: &ContentRef,
            _learner: &LearnerId,
        ) -> Result<WatchStatus, ClientError> {
            self.status_calls.set(self.status_calls.get() + 1);
            if self.hang_status.get() {
                futures::future::pending::<()>().await;
            }
            self.statuses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::NotFound("status".into())))
        }
    }
}
