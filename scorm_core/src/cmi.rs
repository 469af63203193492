// SCORM 1.2 data model rules: element names, defaults, read-only set, per-element
// validation, critical elements, and the SCORM 2004 element aliases.
// Pure functions only; the store itself lives in runtime.rs.

use std::borrow::Cow;

use crate::types::{LessonStatus, SessionKey};

pub const LESSON_STATUS: &str = "cmi.core.lesson_status";
pub const LESSON_LOCATION: &str = "cmi.core.lesson_location";
pub const LESSON_MODE: &str = "cmi.core.lesson_mode";
pub const STUDENT_ID: &str = "cmi.core.student_id";
pub const STUDENT_NAME: &str = "cmi.core.student_name";
pub const CREDIT: &str = "cmi.core.credit";
pub const ENTRY: &str = "cmi.core.entry";
pub const EXIT: &str = "cmi.core.exit";
pub const SCORE_RAW: &str = "cmi.core.score.raw";
pub const SCORE_MAX: &str = "cmi.core.score.max";
pub const SCORE_MIN: &str = "cmi.core.score.min";
pub const TOTAL_TIME: &str = "cmi.core.total_time";
pub const SESSION_TIME: &str = "cmi.core.session_time";
pub const SUSPEND_DATA: &str = "cmi.suspend_data";
pub const LAUNCH_DATA: &str = "cmi.launch_data";
pub const COMMENTS: &str = "cmi.comments";
pub const COMMENTS_FROM_LMS: &str = "cmi.comments_from_lms";
pub const VERSION: &str = "cmi._version";

/// Maximum length of `cmi.suspend_data`, in characters.
pub const SUSPEND_DATA_MAX_CHARS: usize = 4096;

/// Zero timespan, the one fixed literal accepted for `cmi.core.total_time`.
pub const ZERO_TIMESPAN: &str = "00:00:00.00";

const CORE_CHILDREN: &str = "student_id,student_name,lesson_location,credit,lesson_status,entry,score,total_time,lesson_mode,exit,session_time";
const SCORE_CHILDREN: &str = "raw,min,max";

const READ_ONLY: [&str; 8] = [
    STUDENT_NAME,
    STUDENT_ID,
    CREDIT,
    LESSON_MODE,
    SCORE_MAX,
    SCORE_MIN,
    LAUNCH_DATA,
    COMMENTS_FROM_LMS,
];

const CRITICAL: [&str; 4] = [LESSON_STATUS, SCORE_RAW, TOTAL_TIME, EXIT];

const ENTRY_VALUES: [&str; 3] = ["ab-initio", "resume", ""];
const EXIT_VALUES: [&str; 5] = ["time-out", "suspend", "logout", "normal", ""];

/// Default for an element nobody has set yet.
pub fn default_value(element: &str, key: &SessionKey) -> String {
    let value = match element {
        STUDENT_ID => return key.learner_id.as_str().to_string(),
        STUDENT_NAME => return key.learner_name.clone(),
        LESSON_STATUS => LessonStatus::NotAttempted.as_str(),
        CREDIT => "credit",
        ENTRY => "ab-initio",
        SCORE_MAX => "100",
        SCORE_MIN => "0",
        TOTAL_TIME | SESSION_TIME => ZERO_TIMESPAN,
        LESSON_MODE => "normal",
        VERSION => "3.4",
        "cmi.core._children" => CORE_CHILDREN,
        "cmi.core.score._children" => SCORE_CHILDREN,
        _ => "",
    };
    value.to_string()
}

/// Data model keywords (`_version`, `_children`, `_count`) are never writable.
fn is_keyword(element: &str) -> bool {
    element
        .rsplit('.')
        .next()
        .is_some_and(|leaf| matches!(leaf, "_version" | "_children" | "_count"))
}

pub fn is_read_only(element: &str) -> bool {
    READ_ONLY.contains(&element) || is_keyword(element)
}

/// Writes to these elements are committed immediately instead of debounced.
pub fn is_critical(element: &str) -> bool {
    CRITICAL.contains(&element)
}

/// Per-element validation. `Err` carries the diagnostic for error 351.
pub fn validate(element: &str, value: &str) -> Result<(), String> {
    let ok = match element {
        LESSON_STATUS => LessonStatus::parse(value).is_some(),
        SCORE_RAW | SCORE_MAX | SCORE_MIN => is_score(value),
        TOTAL_TIME => value == ZERO_TIMESPAN || CmiTimespan::parse(value).is_some(),
        SUSPEND_DATA => value.chars().count() <= SUSPEND_DATA_MAX_CHARS,
        ENTRY => ENTRY_VALUES.contains(&value),
        EXIT => EXIT_VALUES.contains(&value),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid value for {}", truncate(value, 64), element))
    }
}

/// Empty string or a non-negative number.
fn is_score(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    value
        .trim()
        .parse::<f64>()
        .map(|n| n.is_finite() && n >= 0.0)
        .unwrap_or(false)
}

fn truncate(value: &str, max_chars: usize) -> Cow<'_, str> {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(format!("{}...", &value[..idx])),
        None => Cow::Borrowed(value),
    }
}

// =============================================================================
// CMI timespans
// =============================================================================

/// Parsed `HH+:MM:SS(.s{1,2})?` timespan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmiTimespan {
    seconds: f64,
}

impl CmiTimespan {
    pub fn from_seconds(seconds: f64) -> Self {
        CmiTimespan {
            seconds: if seconds.is_finite() { seconds.max(0.0) } else { 0.0 },
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Parse a SCORM 1.2 timespan. Hours take two or more digits, minutes and
    /// seconds exactly two, the optional fraction one or two.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(':');
        let (hours, minutes, rest) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let (secs, fraction) = match rest.split_once('.') {
            Some((secs, fraction)) => (secs, Some(fraction)),
            None => (rest, None),
        };

        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if hours.len() < 2 || !all_digits(hours) {
            return None;
        }
        if minutes.len() != 2 || !all_digits(minutes) || secs.len() != 2 || !all_digits(secs) {
            return None;
        }
        let fraction_secs = match fraction {
            Some(f) if (1..=2).contains(&f.len()) && all_digits(f) => {
                f.parse::<f64>().ok()? / 10f64.powi(f.len() as i32)
            }
            Some(_) => return None,
            None => 0.0,
        };

        let h: f64 = hours.parse().ok()?;
        let m: f64 = minutes.parse().ok()?;
        let s: f64 = secs.parse().ok()?;
        Some(CmiTimespan::from_seconds(h * 3600.0 + m * 60.0 + s + fraction_secs))
    }

    /// Parse an ISO 8601 duration as written by SCORM 2004 packages (`PT1H2M3.5S`).
    pub fn parse_iso8601(value: &str) -> Option<Self> {
        let body = value.strip_prefix('P')?;
        let (date_part, time_part) = match body.split_once('T') {
            Some((d, t)) => (d, t),
            None => (body, ""),
        };
        if date_part.is_empty() && time_part.is_empty() {
            return None;
        }

        let mut total = 0.0;
        for (part, units) in [
            (date_part, &[('Y', 31_536_000.0), ('M', 2_592_000.0), ('D', 86_400.0)][..]),
            (time_part, &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)][..]),
        ] {
            let mut number = String::new();
            let mut unit_idx = 0;
            for c in part.chars() {
                if c.is_ascii_digit() || c == '.' {
                    number.push(c);
                    continue;
                }
                let pos = units[unit_idx..].iter().position(|(u, _)| *u == c)?;
                unit_idx += pos;
                let amount: f64 = number.parse().ok()?;
                total += amount * units[unit_idx].1;
                unit_idx += 1;
                number.clear();
            }
            if !number.is_empty() {
                return None;
            }
        }
        Some(CmiTimespan::from_seconds(total))
    }

    /// Format as `HH:MM:SS.ss` (hours widen past two digits when needed).
    pub fn to_cmi_string(&self) -> String {
        let centis = (self.seconds * 100.0).round() as u64;
        let hours = centis / 360_000;
        let minutes = (centis / 6_000) % 60;
        let secs = (centis / 100) % 60;
        let frac = centis % 100;
        format!("{:02}:{:02}:{:02}.{:02}", hours, minutes, secs, frac)
    }

    /// Format as an ISO 8601 duration for SCORM 2004 readers.
    pub fn to_iso8601(&self) -> String {
        let centis = (self.seconds * 100.0).round() as u64;
        let hours = centis / 360_000;
        let minutes = (centis / 6_000) % 60;
        let secs = (centis % 6_000) as f64 / 100.0;
        format!("PT{}H{}M{}S", hours, minutes, secs)
    }
}

// =============================================================================
// SCORM 2004 aliases
// =============================================================================

/// How a value crosses between a 2004 element name and its 1.2 storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    None,
    CompletionStatus,
    SuccessStatus,
    Iso8601Duration,
}

/// Outcome of translating a value on its way into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Store(String),
    /// Accepted, but carries no information for the 1.2 model.
    Ignore,
    Invalid(String),
}

/// Storage key plus translation for an element name as called by a package.
pub fn resolve(element: &str) -> (&str, Translation) {
    let mapped = match element {
        "cmi.completion_status" => return (LESSON_STATUS, Translation::CompletionStatus),
        "cmi.success_status" => return (LESSON_STATUS, Translation::SuccessStatus),
        "cmi.session_time" => return (SESSION_TIME, Translation::Iso8601Duration),
        "cmi.total_time" => return (TOTAL_TIME, Translation::Iso8601Duration),
        "cmi.location" => LESSON_LOCATION,
        "cmi.score.raw" => SCORE_RAW,
        "cmi.score.max" => SCORE_MAX,
        "cmi.score.min" => SCORE_MIN,
        "cmi.exit" => EXIT,
        "cmi.entry" => ENTRY,
        "cmi.learner_id" => STUDENT_ID,
        "cmi.learner_name" => STUDENT_NAME,
        "cmi.credit" => CREDIT,
        "cmi.mode" => LESSON_MODE,
        other => other,
    };
    (mapped, Translation::None)
}

impl Translation {
    /// Stored 1.2 value to the representation the caller expects.
    pub fn outbound(&self, stored: &str) -> String {
        match self {
            Translation::None => stored.to_string(),
            Translation::CompletionStatus => match LessonStatus::parse(stored) {
                Some(LessonStatus::Passed | LessonStatus::Failed | LessonStatus::Completed) => {
                    "completed".to_string()
                }
                Some(LessonStatus::Incomplete | LessonStatus::Browsed) => "incomplete".to_string(),
                _ => "not attempted".to_string(),
            },
            Translation::SuccessStatus => match LessonStatus::parse(stored) {
                Some(LessonStatus::Passed) => "passed".to_string(),
                Some(LessonStatus::Failed) => "failed".to_string(),
                _ => "unknown".to_string(),
            },
            Translation::Iso8601Duration => CmiTimespan::parse(stored)
                .unwrap_or_else(|| CmiTimespan::from_seconds(0.0))
                .to_iso8601(),
        }
    }

    /// Caller value to the 1.2 representation stored under the resolved key.
    pub fn inbound(&self, value: &str) -> Inbound {
        match self {
            Translation::None => Inbound::Store(value.to_string()),
            Translation::CompletionStatus => match value {
                "completed" | "incomplete" | "not attempted" => Inbound::Store(value.to_string()),
                "unknown" => Inbound::Store(LessonStatus::NotAttempted.as_str().to_string()),
                _ => Inbound::Invalid(format!("'{}' is not a completion status", value)),
            },
            Translation::SuccessStatus => match value {
                "passed" | "failed" => Inbound::Store(value.to_string()),
                "unknown" => Inbound::Ignore,
                _ => Inbound::Invalid(format!("'{}' is not a success status", value)),
            },
            Translation::Iso8601Duration => match CmiTimespan::parse_iso8601(value) {
                Some(span) => Inbound::Store(span.to_cmi_string()),
                None if CmiTimespan::parse(value).is_some() => Inbound::Store(value.to_string()),
                None => Inbound::Invalid(format!("'{}' is not a duration", value)),
            },
        }
    }
}
