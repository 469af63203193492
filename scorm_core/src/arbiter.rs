// Completion / reward arbitration for repetition-based content.
// Counts are server-authoritative: this module only compares the record
// captured before a viewing with the one returned after recording it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{ContentKind, WatchRecord, WatchStatus};

/// What to tell the learner after a viewing was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RewardOutcome {
    /// This viewing met the requirement and the stars are new.
    JustAwarded { stars: u32 },
    /// Stars were granted in an earlier session.
    AlreadyAwarded,
    /// More repetitions are needed.
    InProgress { current: u32, required: u32, remaining: u32 },
}

impl RewardOutcome {
    pub fn stars_just_awarded(&self) -> bool {
        matches!(self, RewardOutcome::JustAwarded { .. })
    }

    pub fn stars_were_already_awarded(&self) -> bool {
        matches!(self, RewardOutcome::AlreadyAwarded)
    }

    /// Learner-facing message.
    pub fn message(&self, kind: ContentKind) -> String {
        match self {
            RewardOutcome::JustAwarded { stars } => {
                format!("Great job! You earned {} {}!", stars, plural(*stars, "star"))
            }
            RewardOutcome::AlreadyAwarded => {
                "You already earned the stars for this one.".to_string()
            }
            RewardOutcome::InProgress { remaining, .. } => format!(
                "{} it {} more {} to earn stars!",
                capitalize(kind.verb()),
                remaining,
                plural(*remaining, "time")
            ),
        }
    }
}

fn plural(n: u32, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Decides whether a recorded viewing newly grants stars.
pub struct RewardArbiter;

impl RewardArbiter {
    /// `before` is the record captured before this viewing was recorded, if it
    /// could be fetched; `after` is what `recordWatch` returned.
    pub fn evaluate(before: Option<&WatchStatus>, after: &WatchRecord) -> RewardOutcome {
        let required = match before {
            Some(b) if b.required_count > 0 => b.required_count,
            _ => after.required_count,
        };

        let outcome = match before {
            Some(before) if before.stars_awarded => RewardOutcome::AlreadyAwarded,
            Some(_) if after.stars_awarded && after.current_count >= required => {
                RewardOutcome::JustAwarded {
                    stars: after.stars_to_award,
                }
            }
            // Without a "before" record, only the viewing that landed exactly on
            // the requirement can be the one that granted the stars.
            None if after.stars_awarded && after.current_count == required => {
                RewardOutcome::JustAwarded {
                    stars: after.stars_to_award,
                }
            }
            None if after.stars_awarded => RewardOutcome::AlreadyAwarded,
            _ => RewardOutcome::InProgress {
                current: after.current_count,
                required,
                remaining: required.saturating_sub(after.current_count),
            },
        };
        debug!(?before, ?after, ?outcome, "reward evaluated");
        if outcome.stars_just_awarded() {
            info!(stars = after.stars_to_award, "stars awarded");
        }
        outcome
    }

    /// Outcome of an explicit "mark done" approval carrying star fields.
    /// Stars the `before` record already shows were granted in an earlier
    /// session and are never announced again.
    pub fn from_completion(
        before: Option<&WatchStatus>,
        stars_awarded: Option<bool>,
        stars_to_award: Option<u32>,
    ) -> Option<RewardOutcome> {
        let previously = before.is_some_and(|b| b.stars_awarded);
        match (stars_awarded, stars_to_award) {
            (Some(true), _) if previously => Some(RewardOutcome::AlreadyAwarded),
            (Some(true), Some(stars)) if stars > 0 => Some(RewardOutcome::JustAwarded { stars }),
            _ => None,
        }
    }
}

/// Per-session latch: one recorded viewing per session, no matter how many
/// end-of-media events arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchLatch {
    recorded: bool,
}

impl WatchLatch {
    /// Returns `true` exactly once.
    pub fn try_claim(&mut self) -> bool {
        !std::mem::replace(&mut self.recorded, true)
    }

    pub fn is_claimed(&self) -> bool {
        self.recorded
    }
}
