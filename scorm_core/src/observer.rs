// Progress observation adapters.
// Polling reads the runtime on an interval; message mode consumes events pushed
// by a wrapper document. The session picks one at start from configuration.

use serde::{Deserialize, Serialize};

use crate::cmi::{self, CmiTimespan};
use crate::runtime::LmsRuntime;
use crate::types::{LessonStatus, Timestamp, WrapperEvent};

/// Default interval between polls of the runtime.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Which observation adapter a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObserverMode {
    /// Raw SCORM package: poll the runtime object.
    #[default]
    Polling,
    /// Wrapper document: progress is pushed via `postMessage`.
    Messages,
}

/// One observation of the learner's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressSample {
    /// Raw lesson status string as reported.
    pub status: Option<String>,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub time_spent_seconds: Option<f64>,
    /// Wrapper hint: learner reached the last slide. Never proof of completion.
    pub on_last_slide: bool,
    /// Wrapper hint: every slide was shown at least once.
    pub all_slides_viewed: bool,
}

impl ProgressSample {
    pub fn lesson_status(&self) -> Option<LessonStatus> {
        self.status.as_deref().and_then(LessonStatus::parse)
    }
}

/// A progress observation strategy.
pub trait ProgressObserver {
    /// Called on every host tick. Adapters that poll read the runtime here.
    fn on_tick(&mut self, now: Timestamp, runtime: &LmsRuntime) -> Option<ProgressSample>;

    /// Called for every pushed wrapper event.
    fn on_message(&mut self, event: &WrapperEvent) -> Option<ProgressSample>;

    /// Stop observing. No sample is produced afterwards.
    fn cancel(&mut self);

    fn mode(&self) -> ObserverMode;
}

/// Interval-poll adapter.
pub struct PollingObserver {
    interval_ms: u64,
    next_poll: Option<Timestamp>,
}

impl PollingObserver {
    pub fn new(interval_ms: u64, started_at: Timestamp) -> Self {
        PollingObserver {
            interval_ms: interval_ms.max(1),
            next_poll: Some(started_at.plus(interval_ms)),
        }
    }
}

impl ProgressObserver for PollingObserver {
    fn on_tick(&mut self, now: Timestamp, runtime: &LmsRuntime) -> Option<ProgressSample> {
        let due = self.next_poll?;
        if now < due {
            return None;
        }
        self.next_poll = Some(now.plus(self.interval_ms));

        let status = runtime.peek(cmi::LESSON_STATUS)?;
        let parse_number = |element: &str| {
            runtime
                .peek(element)
                .and_then(|v| v.trim().parse::<f64>().ok())
        };
        Some(ProgressSample {
            status: Some(status),
            score: parse_number(cmi::SCORE_RAW),
            max_score: parse_number(cmi::SCORE_MAX),
            time_spent_seconds: runtime
                .peek(cmi::TOTAL_TIME)
                .and_then(|t| CmiTimespan::parse(&t))
                .map(|span| span.seconds()),
            on_last_slide: false,
            all_slides_viewed: false,
        })
    }

    fn on_message(&mut self, _event: &WrapperEvent) -> Option<ProgressSample> {
        None
    }

    fn cancel(&mut self) {
        self.next_poll = None;
    }

    fn mode(&self) -> ObserverMode {
        ObserverMode::Polling
    }
}

/// Push-listener adapter. Never polls.
#[derive(Default)]
pub struct MessageObserver {
    cancelled: bool,
}

impl MessageObserver {
    pub fn new() -> Self {
        MessageObserver::default()
    }
}

impl ProgressObserver for MessageObserver {
    fn on_tick(&mut self, _now: Timestamp, _runtime: &LmsRuntime) -> Option<ProgressSample> {
        None
    }

    fn on_message(&mut self, event: &WrapperEvent) -> Option<ProgressSample> {
        if self.cancelled {
            return None;
        }
        let time_spent_seconds = event.time_spent_seconds.or_else(|| {
            event
                .time_spent
                .as_deref()
                .and_then(parse_loose_timespan)
        });
        let on_last_slide = event.is_last_slide.unwrap_or_else(|| {
            matches!((event.current_slide, event.total_slides), (Some(c), Some(t)) if t > 0 && c >= t)
        });
        Some(ProgressSample {
            status: event.status.clone(),
            score: event.score,
            max_score: event.score_max,
            time_spent_seconds,
            on_last_slide,
            all_slides_viewed: event.all_slides_viewed.unwrap_or(false),
        })
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn mode(&self) -> ObserverMode {
        ObserverMode::Messages
    }
}

/// Wrappers report `H:MM:SS`, `HH:MM:SS(.ss)`, ISO durations or bare seconds.
fn parse_loose_timespan(value: &str) -> Option<f64> {
    if let Some(span) = CmiTimespan::parse(value).or_else(|| CmiTimespan::parse_iso8601(value)) {
        return Some(span.seconds());
    }
    if let Ok(seconds) = value.trim().parse::<f64>() {
        return Some(seconds);
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let mut total = 0.0;
    for (part, scale) in parts.iter().zip([3600.0, 60.0, 1.0]) {
        total += part.trim().parse::<f64>().ok()? * scale;
    }
    Some(total)
}

/// Build the adapter for `mode`.
pub fn observer_for(mode: ObserverMode, poll_interval_ms: u64, now: Timestamp) -> Box<dyn ProgressObserver> {
    match mode {
        ObserverMode::Polling => Box::new(PollingObserver::new(poll_interval_ms, now)),
        ObserverMode::Messages => Box::new(MessageObserver::new()),
    }
}
