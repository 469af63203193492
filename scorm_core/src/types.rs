// Strong typing over strings. Newtypes for time, identities, and the records
// exchanged with the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wall-clock timestamp in milliseconds. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Timestamp `ms` milliseconds later.
    pub fn plus(&self, ms: u64) -> Self {
        Timestamp(self.0.saturating_add(ms))
    }

    /// Milliseconds elapsed since `earlier` (zero if `earlier` is in the future).
    pub fn saturating_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            Timestamp(js_sys::Date::now() as u64)
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            use std::time::{SystemTime, UNIX_EPOCH};
            let ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            Timestamp(ms)
        }
    }
}

/// Identifier of a content item (SCORM package, video, book, audio).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the learner (child account) viewing the content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct LearnerId(String);

impl LearnerId {
    pub fn new(id: impl Into<String>) -> Self {
        LearnerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of content a player modal can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Raw or wrapped SCORM package played in an iframe.
    Scorm,
    /// Single-play interactive content, also SCORM-packaged.
    Explore,
    Video,
    Book,
    Audio,
}

impl ContentKind {
    /// Repetitions required before stars are granted, when the backend has
    /// not configured one.
    pub fn default_required_count(&self) -> u32 {
        match self {
            ContentKind::Explore => 1,
            _ => 5,
        }
    }

    /// Whether this content talks to an LMS runtime object inside a frame.
    pub fn uses_lms_runtime(&self) -> bool {
        matches!(self, ContentKind::Scorm | ContentKind::Explore)
    }

    /// Verb used in "N more times" progress messages.
    pub fn verb(&self) -> &'static str {
        match self {
            ContentKind::Video => "watch",
            ContentKind::Book => "read",
            ContentKind::Audio => "listen to",
            ContentKind::Scorm | ContentKind::Explore => "play",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Scorm => "scorm",
            ContentKind::Explore => "explore",
            ContentKind::Video => "video",
            ContentKind::Book => "book",
            ContentKind::Audio => "audio",
        }
    }
}

/// A content item to open: id plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: ContentId,
    pub kind: ContentKind,
}

impl ContentRef {
    pub fn new(id: impl Into<String>, kind: ContentKind) -> Self {
        ContentRef {
            id: ContentId::new(id),
            kind,
        }
    }
}

/// Identity a runtime object is bound to. Immutable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub content_id: ContentId,
    pub content_kind: ContentKind,
    pub learner_id: LearnerId,
    /// Display name served as `cmi.core.student_name`.
    #[serde(default)]
    pub learner_name: String,
}

impl SessionKey {
    pub fn new(content: &ContentRef, learner_id: LearnerId, learner_name: impl Into<String>) -> Self {
        SessionKey {
            content_id: content.id.clone(),
            content_kind: content.kind,
            learner_id,
            learner_name: learner_name.into(),
        }
    }
}

/// SCORM lesson status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LessonStatus {
    #[serde(rename = "passed")]
    Passed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "incomplete")]
    Incomplete,
    #[serde(rename = "browsed")]
    Browsed,
    #[serde(rename = "not attempted")]
    NotAttempted,
}

impl LessonStatus {
    pub const ALL: [LessonStatus; 6] = [
        LessonStatus::Passed,
        LessonStatus::Failed,
        LessonStatus::Completed,
        LessonStatus::Incomplete,
        LessonStatus::Browsed,
        LessonStatus::NotAttempted,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Passed => "passed",
            LessonStatus::Failed => "failed",
            LessonStatus::Completed => "completed",
            LessonStatus::Incomplete => "incomplete",
            LessonStatus::Browsed => "browsed",
            LessonStatus::NotAttempted => "not attempted",
        }
    }

    /// Statuses that count as having finished the content.
    pub fn is_finished(&self) -> bool {
        matches!(self, LessonStatus::Passed | LessonStatus::Completed)
    }
}

impl fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score triple as stored by SCORM (strings, possibly empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScoreTriple {
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub max: String,
    #[serde(default)]
    pub min: String,
}

/// Full progress snapshot persisted on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub lesson_status: String,
    pub score: ScoreTriple,
    /// `cmi.core.total_time`, CMI timespan format.
    pub time_spent: String,
    pub suspend_data: String,
    pub entry: String,
    pub exit: String,
}

/// Score fields as returned by `loadProgress`; any may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoredScore {
    #[serde(default, deserialize_with = "lenient_string")]
    pub raw: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub max: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub min: Option<String>,
}

/// Learner progress record returned by `loadProgress`.
/// Absent fields fall back to LMS defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoredProgress {
    #[serde(default)]
    pub lesson_status: Option<String>,
    #[serde(default)]
    pub score: Option<StoredScore>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub time_spent: Option<String>,
    #[serde(default)]
    pub suspend_data: Option<String>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub exit: Option<String>,
}

/// Response of `getLaunchUrl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInfo {
    pub launch_url: String,
}

/// Response of `checkCompletion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCheck {
    pub can_complete: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub stars_awarded: Option<bool>,
    #[serde(default)]
    pub stars_to_award: Option<u32>,
    #[serde(default)]
    pub total_stars: Option<u32>,
}

/// Response of `recordWatch`: the progress record after this viewing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRecord {
    pub current_count: u32,
    pub required_count: u32,
    pub stars_awarded: bool,
    #[serde(default)]
    pub stars_awarded_at: Option<String>,
    #[serde(default)]
    pub stars_to_award: u32,
}

/// Response of `getWatchStatus`: read-only view of the progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    pub current_count: u32,
    pub required_count: u32,
    pub stars_awarded: bool,
}

/// Progress event pushed by a wrapper document via `postMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WrapperEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score_max: Option<f64>,
    /// CMI timespan string such as `00:01:30`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub time_spent: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub time_spent_seconds: Option<f64>,
    #[serde(default)]
    pub current_slide: Option<u32>,
    #[serde(default)]
    pub total_slides: Option<u32>,
    #[serde(default)]
    pub is_last_slide: Option<bool>,
    #[serde(default)]
    pub all_slides_viewed: Option<bool>,
}

/// Accepts a JSON string or number for a string field.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts a JSON number or numeric string for a number field.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic() {
        let ts = Timestamp::from_millis(1_500);
        assert_eq!(ts.plus(500).as_millis(), 2_000);
        assert_eq!(ts.saturating_since(Timestamp::from_millis(2_000)), 0);
        assert!((ts.as_secs() - 1.5).abs() < 0.0001);
    }

    #[test]
    fn lesson_status_round_trips_exact_strings() {
        assert_eq!(LessonStatus::parse("not attempted"), Some(LessonStatus::NotAttempted));
        assert_eq!(LessonStatus::parse("Completed"), None);
        assert!(LessonStatus::Passed.is_finished());
        assert!(!LessonStatus::Browsed.is_finished());
    }

    #[test]
    fn explore_content_requires_single_play() {
        assert_eq!(ContentKind::Explore.default_required_count(), 1);
        assert_eq!(ContentKind::Video.default_required_count(), 5);
        assert!(ContentKind::Scorm.uses_lms_runtime());
        assert!(!ContentKind::Book.uses_lms_runtime());
    }

    #[test]
    fn stored_progress_tolerates_missing_and_numeric_fields() {
        let json = r#"{"lessonStatus":"incomplete","score":{"raw":42,"max":"100"},"timeSpent":null}"#;
        let progress: StoredProgress = serde_json::from_str(json).unwrap();
        assert_eq!(progress.lesson_status.as_deref(), Some("incomplete"));
        let score = progress.score.unwrap();
        assert_eq!(score.raw.as_deref(), Some("42"));
        assert_eq!(score.min, None);
        assert_eq!(progress.time_spent, None);
        assert_eq!(progress.suspend_data, None);
    }

    #[test]
    fn wrapper_event_accepts_string_scores() {
        let json = r#"{"status":"incomplete","score":"7","scoreMax":10,"timeSpent":"00:02:00","isLastSlide":true}"#;
        let event: WrapperEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.score, Some(7.0));
        assert_eq!(event.score_max, Some(10.0));
        assert_eq!(event.is_last_slide, Some(true));
        assert_eq!(event.time_spent_seconds, None);
    }
}
