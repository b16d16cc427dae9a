//! Worthiness scoring.
//!
//! Pure and deterministic over `(pulse, history, config)`: a weighted sum
//! of four normalized sub-scores, clamped to `[0, 1]`. No I/O and no
//! clock; history arrives precomputed from the caller, and a failed
//! history lookup shows up here as all zeros.

use pulseforge_types::profile::HistorySummary;
use pulseforge_types::pulse::{FIELD_CAP, StoppedPulse};
use pulseforge_types::ScoringConfig;

/// The score with its per-component breakdown for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    /// Normalized content-effort sub-score (combined field length).
    pub content_effort: f64,
    /// Normalized duration sub-score.
    pub duration: f64,
    /// Normalized reflection-depth sub-score.
    pub reflection_depth: f64,
    /// Normalized frequency-bonus sub-score.
    pub frequency_bonus: f64,
    /// The weighted, clamped total.
    pub total: f64,
}

/// Score a completed pulse against its user's recent history.
pub fn score_pulse(
    pulse: &StoppedPulse,
    history: &HistorySummary,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let content_effort = content_effort(pulse, config);
    let duration = duration_score(pulse, config);
    let reflection_depth = reflection_depth(pulse, config);
    let frequency_bonus = frequency_bonus(history, config);

    let weights = &config.weights;
    let total = (weights.intent * content_effort
        + weights.duration * duration
        + weights.reflection * reflection_depth
        + weights.frequency * frequency_bonus)
        .clamp(0.0, 1.0);

    ScoreBreakdown {
        content_effort,
        duration,
        reflection_depth,
        frequency_bonus,
        total,
    }
}

/// Grows with combined intent + reflection length; saturates near the
/// configured combined cap.
fn content_effort(pulse: &StoppedPulse, config: &ScoringConfig) -> f64 {
    let combined = pulse.intent.chars().count() + pulse.reflection.chars().count();
    let saturation = config.content_saturation_chars.max(1) as f64;
    (combined as f64 / saturation).min(1.0)
}

/// Grows with effective duration; saturates around the configured ceiling.
/// Sessions under the floor score zero.
fn duration_score(pulse: &StoppedPulse, config: &ScoringConfig) -> f64 {
    let effective = pulse.effective_duration_seconds;
    if effective < config.duration_floor_seconds {
        return 0.0;
    }
    let saturation = config.duration_saturation_seconds.max(1) as f64;
    (f64::from(effective) / saturation).min(1.0)
}

/// Grows with reflection length, with a fixed boost when the reflection
/// contains a breakthrough token from the configured vocabulary.
fn reflection_depth(pulse: &StoppedPulse, config: &ScoringConfig) -> f64 {
    let length_part =
        (pulse.reflection.chars().count() as f64 / FIELD_CAP as f64).min(1.0) * 0.6;

    let lower = pulse.reflection.to_lowercase();
    let token_part = if config
        .breakthrough_tokens
        .iter()
        .any(|token| lower.contains(token.as_str()))
    {
        0.4
    } else {
        0.0
    };

    (length_part + token_part).min(1.0)
}

/// Rewards the first completions of the day; decays linearly to zero at
/// the configured daily cap.
fn frequency_bonus(history: &HistorySummary, config: &ScoringConfig) -> f64 {
    let cap = config.daily_frequency_cap.max(1);
    if history.completions_today >= cap {
        return 0.0;
    }
    f64::from(cap - history.completions_today) / f64::from(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn pulse(intent: &str, reflection: &str, effective_seconds: u32) -> StoppedPulse {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        StoppedPulse {
            pulse_id: "p-1".into(),
            user_id: "u-1".into(),
            intent: intent.into(),
            intent_emotion: None,
            start_time: start,
            duration_seconds: effective_seconds.max(1),
            reflection: reflection.into(),
            reflection_emotion: None,
            stopped_at: start + chrono::Duration::seconds(i64::from(effective_seconds)),
            effective_duration_seconds: effective_seconds,
        }
    }

    #[test]
    fn trivial_pulse_scores_low() {
        let breakdown = score_pulse(
            &pulse("note", "", 120),
            &HistorySummary {
                completions_today: 2,
                ..Default::default()
            },
            &ScoringConfig::default(),
        );
        assert!(breakdown.total < 0.2, "total was {}", breakdown.total);
    }

    #[test]
    fn rich_pulse_scores_high() {
        let intent = "a".repeat(200);
        let reflection = format!("finally had a breakthrough. {}", "b".repeat(170));
        let breakdown = score_pulse(
            &pulse(&intent, &reflection, 1800),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        assert!(breakdown.total >= 0.8, "total was {}", breakdown.total);
        assert_eq!(breakdown.content_effort, 1.0);
        assert_eq!(breakdown.duration, 1.0);
    }

    #[test]
    fn sessions_under_the_floor_score_zero_duration() {
        let breakdown = score_pulse(
            &pulse("work", "done", 45),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        assert_eq!(breakdown.duration, 0.0);
    }

    #[test]
    fn duration_saturates_at_the_ceiling() {
        let at_ceiling = score_pulse(
            &pulse("work", "", 1800),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        let past_ceiling = score_pulse(
            &pulse("work", "", 7200),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        assert_eq!(at_ceiling.duration, 1.0);
        assert_eq!(past_ceiling.duration, 1.0);
    }

    #[test]
    fn breakthrough_token_lifts_reflection_depth() {
        let plain = score_pulse(
            &pulse("work", "it went fine today", 600),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        let breakthrough = score_pulse(
            &pulse("work", "it finally clicked today", 600),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        assert!(breakthrough.reflection_depth > plain.reflection_depth + 0.3);
    }

    #[test]
    fn token_match_is_case_insensitive() {
        let breakdown = score_pulse(
            &pulse("work", "BREAKTHROUGH at last", 600),
            &HistorySummary::default(),
            &ScoringConfig::default(),
        );
        assert!(breakdown.reflection_depth >= 0.4);
    }

    #[test]
    fn frequency_bonus_decays_with_daily_completions() {
        let config = ScoringConfig::default();
        let at = |completions_today| {
            score_pulse(
                &pulse("work", "", 600),
                &HistorySummary {
                    completions_today,
                    ..Default::default()
                },
                &config,
            )
            .frequency_bonus
        };
        assert_eq!(at(0), 1.0);
        assert!(at(1) < at(0));
        assert!(at(2) < at(1));
        assert_eq!(at(config.daily_frequency_cap), 0.0);
        assert_eq!(at(config.daily_frequency_cap + 5), 0.0);
    }

    #[test]
    fn total_stays_in_unit_interval_even_with_odd_weights() {
        let mut config = ScoringConfig::default();
        config.weights.intent = 2.0;
        config.weights.duration = 2.0;
        let breakdown = score_pulse(
            &pulse(&"a".repeat(200), &"b".repeat(200), 3600),
            &HistorySummary::default(),
            &config,
        );
        assert_eq!(breakdown.total, 1.0);
    }

    // Determinism property: identical inputs give identical scores across
    // independent runs, for randomly generated pulses.
    #[test]
    fn scoring_is_deterministic_over_random_pulses() {
        let mut rng = StdRng::seed_from_u64(0xBEEF);
        let config = ScoringConfig::default();

        for _ in 0..200 {
            let intent_len = rng.gen_range(0..=200);
            let reflection_len = rng.gen_range(0..=200);
            let effective = rng.gen_range(0..7200);
            let completions = rng.gen_range(0..10);

            let p = pulse(
                &"i".repeat(intent_len),
                &"r".repeat(reflection_len),
                effective,
            );
            let history = HistorySummary {
                completions_today: completions,
                ai_enhanced_last_7_days: rng.gen_range(0..20),
                mean_duration_seconds: rng.gen_range(0.0..3600.0),
            };

            let first = score_pulse(&p, &history, &config);
            let second = score_pulse(&p, &history, &config);
            assert_eq!(first, second);
            assert!((0.0..=1.0).contains(&first.total));
        }
    }
}
