// LMS runtime object: the SCORM API surface an embedded package calls into.
// Holds the data-model store, the last-error state and the deferred commit.
// Time is always passed in; the runtime never reads a clock.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::client::{ProgressSink, SaveLedger};
use crate::cmi::{self, CmiTimespan, Inbound};
use crate::error::ClientError;
use crate::scorm_error::{ErrorState, ScormError};
use crate::types::{ProgressSnapshot, ScoreTriple, SessionKey, StoredProgress, Timestamp};

/// Default quiet period before a debounced commit fires.
pub const DEFAULT_COMMIT_DEBOUNCE_MS: u64 = 2_000;

/// Longest wait for saved progress before commits go out with defaults.
pub const DEFAULT_SEED_TIMEOUT_MS: u64 = 10_000;

/// SCORM string booleans.
pub fn lms_bool(ok: bool) -> &'static str {
    if ok {
        "true"
    } else {
        "false"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    NotInitialized,
    Running,
    Finished,
}

/// Whether the learner's saved progress has been applied to the store yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seed {
    Pending,
    Settled,
}

/// One runtime object per viewing session; never reused.
pub struct LmsRuntime {
    key: SessionKey,
    store: HashMap<String, String>,
    lifecycle: Lifecycle,
    errors: ErrorState,
    /// Elements the package wrote since `initialize`; seeding never overwrites them.
    written: HashSet<String>,
    revision: u64,
    submitted: u64,
    ledger: Rc<SaveLedger>,
    commit_due: Option<Timestamp>,
    seed: Seed,
    /// Past this point a pending seed settles with defaults on the next `poll`.
    seed_deadline: Option<Timestamp>,
    held_commit: bool,
    debounce_ms: u64,
    sink: Rc<dyn ProgressSink>,
}

impl fmt::Debug for LmsRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmsRuntime")
            .field("content", &self.key.content_id)
            .field("lifecycle", &self.lifecycle)
            .field("seed", &self.seed)
            .field("revision", &self.revision)
            .field("submitted", &self.submitted)
            .field("commit_due", &self.commit_due)
            .finish_non_exhaustive()
    }
}

impl LmsRuntime {
    pub fn new(key: SessionKey, sink: Rc<dyn ProgressSink>) -> Self {
        LmsRuntime {
            key,
            store: HashMap::new(),
            lifecycle: Lifecycle::NotInitialized,
            errors: ErrorState::default(),
            written: HashSet::new(),
            revision: 0,
            submitted: 0,
            ledger: SaveLedger::new(),
            commit_due: None,
            seed: Seed::Pending,
            seed_deadline: None,
            held_commit: false,
            debounce_ms: DEFAULT_COMMIT_DEBOUNCE_MS,
            sink,
        }
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    /// Bound the wait for `seed`/`seed_failed`. Without a deadline commits are
    /// held until one of them is called.
    pub fn with_seed_deadline(mut self, deadline: Timestamp) -> Self {
        self.seed_deadline = Some(deadline);
        self
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn is_finished(&self) -> bool {
        self.lifecycle == Lifecycle::Finished
    }

    /// Saved progress has neither been applied nor given up on.
    pub fn awaiting_seed(&self) -> bool {
        self.seed == Seed::Pending
    }

    /// Writes not yet acknowledged by the backend.
    pub fn has_uncommitted_changes(&self) -> bool {
        self.ledger.confirmed() < self.revision
    }

    /// Deadline of the deferred commit, if one is scheduled.
    pub fn commit_due(&self) -> Option<Timestamp> {
        self.commit_due
    }

    pub fn last_error(&self) -> ScormError {
        self.errors.error
    }

    // =========================================================================
    // SCORM API
    // =========================================================================

    /// `LMSInitialize("")`. Returns immediately; saved progress is applied
    /// later through `seed`/`seed_failed`.
    pub fn initialize(&mut self) -> bool {
        match self.lifecycle {
            Lifecycle::Running => {
                self.errors
                    .set(ScormError::GeneralException, "LMSInitialize called twice");
                false
            }
            Lifecycle::Finished => {
                self.errors.set(
                    ScormError::GeneralException,
                    "LMSInitialize after LMSFinish; a new session is required",
                );
                false
            }
            Lifecycle::NotInitialized => {
                self.lifecycle = Lifecycle::Running;
                self.errors.clear();
                info!(content = %self.key.content_id, learner = %self.key.learner_id, "LMS initialized");
                true
            }
        }
    }

    /// `LMSGetValue(element)`. Empty string on failure.
    pub fn get_value(&mut self, element: &str) -> String {
        if !self.is_initialized() {
            self.errors
                .set(ScormError::NotInitialized, format!("LMSGetValue({}) before LMSInitialize", element));
            return String::new();
        }
        if element.is_empty() {
            self.errors
                .set(ScormError::InvalidArgument, "LMSGetValue requires an element name");
            return String::new();
        }

        let (key, translation) = cmi::resolve(element);
        let value = translation.outbound(&self.value_of(key));
        self.errors.clear();
        value
    }

    /// `LMSSetValue(element, value)`.
    pub fn set_value(&mut self, element: &str, value: &str, now: Timestamp) -> bool {
        if !self.is_initialized() {
            self.errors
                .set(ScormError::NotInitialized, format!("LMSSetValue({}) before LMSInitialize", element));
            return false;
        }
        if element.is_empty() {
            self.errors
                .set(ScormError::InvalidArgument, "LMSSetValue requires an element name");
            return false;
        }

        let (key, translation) = cmi::resolve(element);
        if cmi::is_read_only(key) {
            self.errors
                .set(ScormError::ReadOnly, format!("{} is read only", element));
            return false;
        }
        let value = match translation.inbound(value) {
            Inbound::Store(value) => value,
            Inbound::Ignore => {
                self.errors.clear();
                return true;
            }
            Inbound::Invalid(diagnostic) => {
                self.errors.set(ScormError::InvalidSetValue, diagnostic);
                return false;
            }
        };
        if let Err(diagnostic) = cmi::validate(key, &value) {
            self.errors.set(ScormError::InvalidSetValue, diagnostic);
            return false;
        }

        let key = key.to_string();
        debug!(element = %key, "LMSSetValue");
        self.written.insert(key.clone());
        let critical = cmi::is_critical(&key);
        self.store.insert(key, value);
        self.revision += 1;
        self.errors.clear();

        if critical {
            if let Err(e) = self.flush(false) {
                warn!(error = %e, "immediate commit of critical element failed");
            }
        } else {
            self.commit_due = Some(now.plus(self.debounce_ms));
        }
        true
    }

    /// `LMSCommit("")`. A no-op success when nothing changed since the last save.
    pub fn commit(&mut self) -> bool {
        if !self.is_initialized() {
            self.errors
                .set(ScormError::NotInitialized, "LMSCommit before LMSInitialize");
            return false;
        }
        match self.flush(false) {
            Ok(()) => {
                self.errors.clear();
                true
            }
            Err(e) => {
                self.errors.set(ScormError::GeneralException, e.to_string());
                false
            }
        }
    }

    /// `LMSFinish("")`. Final commit, then every further call fails with 301.
    pub fn finish(&mut self) -> bool {
        if !self.is_initialized() {
            self.errors
                .set(ScormError::NotInitialized, "LMSFinish before LMSInitialize");
            return false;
        }
        let result = self.flush(true);
        self.commit_due = None;
        self.lifecycle = Lifecycle::Finished;
        info!(content = %self.key.content_id, "LMS finished");
        match result {
            Ok(()) => {
                self.errors.clear();
                true
            }
            Err(e) => {
                self.errors.set(ScormError::GeneralException, e.to_string());
                false
            }
        }
    }

    /// `LMSGetLastError()`.
    pub fn get_last_error(&self) -> String {
        self.errors.error.code().to_string()
    }

    /// `LMSGetErrorString(code)`.
    pub fn get_error_string(&self, code: &str) -> String {
        self.errors.error_string(code)
    }

    /// `LMSGetDiagnostic(code)`.
    pub fn get_diagnostic(&self, code: &str) -> String {
        self.errors.diagnostic(code)
    }

    /// Record error 201 for a call whose arguments were not strings.
    pub fn reject_argument(&mut self, method: &str) {
        self.errors.set(
            ScormError::InvalidArgument,
            format!("{} expects string arguments", method),
        );
    }

    // =========================================================================
    // Host side
    // =========================================================================

    /// Current value (stored or default) without touching the error state.
    pub fn value_of(&self, key: &str) -> String {
        self.store
            .get(key)
            .cloned()
            .unwrap_or_else(|| cmi::default_value(key, &self.key))
    }

    /// Read an element for observation. `None` unless initialized.
    pub fn peek(&self, element: &str) -> Option<String> {
        if !self.is_initialized() {
            return None;
        }
        let (key, translation) = cmi::resolve(element);
        Some(translation.outbound(&self.value_of(key)))
    }

    /// The full progress snapshot a commit persists.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            lesson_status: self.value_of(cmi::LESSON_STATUS),
            score: ScoreTriple {
                raw: self.value_of(cmi::SCORE_RAW),
                max: self.value_of(cmi::SCORE_MAX),
                min: self.value_of(cmi::SCORE_MIN),
            },
            time_spent: self.value_of(cmi::TOTAL_TIME),
            suspend_data: self.value_of(cmi::SUSPEND_DATA),
            entry: self.value_of(cmi::ENTRY),
            exit: self.value_of(cmi::EXIT),
        }
    }

    /// Apply the learner's saved progress. Elements the package already wrote
    /// keep their values; invalid stored values are skipped.
    pub fn seed(&mut self, progress: StoredProgress) {
        if self.seed == Seed::Settled {
            debug!("saved progress arrived after seeding settled; ignored");
            return;
        }

        let resumes = progress.exit.as_deref() == Some("suspend");
        let score = progress.score.unwrap_or_default();
        let time_spent = progress.time_spent.map(|t| normalize_time_spent(&t));
        let entry = if resumes {
            Some("resume".to_string())
        } else {
            progress.entry
        };

        let fields = [
            (cmi::LESSON_STATUS, progress.lesson_status),
            (cmi::SCORE_RAW, score.raw),
            (cmi::SCORE_MAX, score.max),
            (cmi::SCORE_MIN, score.min),
            (cmi::TOTAL_TIME, time_spent),
            (cmi::SUSPEND_DATA, progress.suspend_data),
            (cmi::ENTRY, entry),
            (cmi::EXIT, progress.exit),
        ];
        for (element, value) in fields {
            let Some(value) = value else { continue };
            if self.written.contains(element) {
                continue;
            }
            match cmi::validate(element, &value) {
                Ok(()) => {
                    self.store.insert(element.to_string(), value);
                }
                Err(reason) => debug!(element, %reason, "skipping stored value"),
            }
        }
        info!(content = %self.key.content_id, "saved progress applied");
        self.settle_seed();
    }

    /// Loading saved progress failed: keep the defaults.
    pub fn seed_failed(&mut self) {
        if self.seed == Seed::Pending {
            warn!(content = %self.key.content_id, "saved progress unavailable; using defaults");
            self.settle_seed();
        }
    }

    fn settle_seed(&mut self) {
        self.seed = Seed::Settled;
        if std::mem::take(&mut self.held_commit) {
            let force = self.is_finished();
            if let Err(e) = self.flush(force) {
                warn!(error = %e, "held commit failed");
            }
        }
    }

    /// Fire the deferred commit once its deadline has passed, and give up on
    /// saved progress once the seed deadline has. Returns whether a commit was
    /// attempted.
    pub fn poll(&mut self, now: Timestamp) -> bool {
        if self.seed == Seed::Pending && self.seed_deadline.is_some_and(|at| now >= at) {
            warn!(content = %self.key.content_id, "saved progress did not arrive in time");
            let held = self.held_commit;
            self.seed_failed();
            if held {
                return true;
            }
        }
        match self.commit_due {
            Some(due) if now >= due && self.is_initialized() => {
                if let Err(e) = self.flush(false) {
                    warn!(error = %e, "deferred commit failed");
                }
                true
            }
            _ => false,
        }
    }

    /// Drop the deferred commit without saving. Used on session teardown.
    pub fn cancel_timers(&mut self) {
        self.commit_due = None;
    }

    /// Submit a snapshot when there is something new to save. `force` also
    /// resends changes whose last save failed.
    fn flush(&mut self, force: bool) -> Result<(), ClientError> {
        self.commit_due = None;
        if self.seed == Seed::Pending {
            self.held_commit = true;
            debug!("commit held until saved progress is applied");
            return Ok(());
        }

        let unsent = self.submitted < self.revision;
        let failed_retry = (force || self.ledger.last_failed()) && self.has_uncommitted_changes();
        if !unsent && !failed_retry {
            return Ok(());
        }

        let revision = self.revision;
        let snapshot = self.snapshot();
        debug!(revision, status = %snapshot.lesson_status, "committing progress");
        self.sink
            .submit(&self.key, snapshot, self.ledger.ack_for(revision))?;
        self.submitted = revision;
        Ok(())
    }
}

/// Backends report time spent either as a CMI timespan or as plain seconds.
fn normalize_time_spent(raw: &str) -> String {
    if CmiTimespan::parse(raw).is_some() {
        return raw.to_string();
    }
    match raw.trim().parse::<f64>() {
        Ok(seconds) => CmiTimespan::from_seconds(seconds).to_cmi_string(),
        Err(_) => raw.to_string(),
    }
}
