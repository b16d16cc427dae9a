//! The admission decision: spend budget on this pulse, or not.
//!
//! Policy rules are evaluated in order; the first match wins:
//!
//! 1. Global kill switch.
//! 2. Budget guard against the tier's daily and monthly caps.
//! 3. Deterministic admit at or above the high threshold.
//! 4. Probabilistic admit in the mid band, seeded by pulse id so replays
//!    decide identically.
//! 5. Reject.
//!
//! The tier floor (`min_score`) raises the effective admission floor, so a
//! free-tier pulse needs a notably strong score before any budget is
//! considered spent on it. The controller publishes an estimated cost but
//! reserves nothing; the premium enhancer reconciles the actual cost
//! against the ledger afterwards.
//!
//! The controller never fails a pulse: config or ledger trouble after
//! bounded retries produces a `degraded` decision instead of an error.

use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;
use tracing::{debug, warn};

use pulseforge_llm::TariffTable;
use pulseforge_types::profile::{HistorySummary, UserProfile};
use pulseforge_types::pulse::{BudgetState, DecisionReason, SelectionInfo, StoppedPulse};
use pulseforge_types::{PipelineConfig, ScoringConfig};

use crate::clock::Clock;
use crate::config::ConfigResolver;
use crate::enhance::MAX_OUTPUT_TOKENS;
use crate::enhance::premium::PROMPT_OVERHEAD_CHARS;
use crate::ledger::BudgetLedger;
use crate::scorer::{ScoreBreakdown, score_pulse};

/// The admission outcome for one pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the premium path should be taken.
    pub ai_worthy: bool,

    /// The first policy rule that matched.
    pub reason: DecisionReason,

    /// Published cost estimate in cents.
    pub estimated_cost_cents: u32,

    /// Whether a wealthier budget would have admitted this pulse.
    pub could_be_enhanced: bool,

    /// The worthiness score.
    pub score: f64,

    /// Per-component score breakdown, for logging.
    pub breakdown: ScoreBreakdown,

    /// Budget usage observed at decision time.
    pub budget: BudgetState,

    /// When the decision was made.
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

impl Decision {
    /// The decision record to attach to the ingested pulse.
    pub fn selection_info(&self) -> SelectionInfo {
        SelectionInfo {
            decision_reason: self.reason,
            worthiness_score: self.score,
            estimated_cost_cents: self.estimated_cost_cents,
            could_be_enhanced: self.could_be_enhanced,
            budget_snapshot: self.budget,
            decided_at: self.decided_at,
        }
    }
}

/// Combines the scorer, budget ledger, and tier policy into a decision.
pub struct AdmissionController {
    config: Arc<ConfigResolver>,
    ledger: Arc<dyn BudgetLedger>,
    tariffs: Arc<TariffTable>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    /// Create a controller over the shared config, ledger, and tariffs.
    pub fn new(
        config: Arc<ConfigResolver>,
        ledger: Arc<dyn BudgetLedger>,
        tariffs: Arc<TariffTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            tariffs,
            clock,
        }
    }

    /// Decide whether to spend premium budget on this pulse.
    ///
    /// Infallible: failures of the config or ledger reads degrade the
    /// decision rather than the pulse.
    pub async fn decide(
        &self,
        pulse: &StoppedPulse,
        profile: &UserProfile,
        history: &HistorySummary,
    ) -> Decision {
        let decided_at = self.clock.now();

        let config = match self.config.snapshot().await {
            Ok(config) => config,
            Err(err) => {
                warn!(pulse_id = %pulse.pulse_id, error = %err, "config unavailable, degrading");
                return self.degraded(pulse, profile, history, decided_at);
            }
        };

        let breakdown = score_pulse(pulse, history, &config.scoring);
        let score = breakdown.total;
        let policy = config.tiers.for_tier(profile.tier);
        let estimate = self.estimate_cents(pulse, &config);

        if !config.ai_enabled {
            return Decision {
                ai_worthy: false,
                reason: DecisionReason::GloballyDisabled,
                estimated_cost_cents: estimate,
                could_be_enhanced: false,
                score,
                breakdown,
                budget: BudgetState {
                    daily_used_cents: 0,
                    monthly_used_cents: 0,
                    tier: profile.tier,
                },
                decided_at,
            };
        }

        let snapshot = match self.read_ledger(&pulse.user_id).await {
            Ok(snapshot) => snapshot,
            Err(message) => {
                warn!(pulse_id = %pulse.pulse_id, error = %message, "ledger unavailable, degrading");
                return self.degraded(pulse, profile, history, decided_at);
            }
        };
        let budget = BudgetState {
            daily_used_cents: snapshot.daily_used_cents,
            monthly_used_cents: snapshot.monthly_used_cents,
            tier: profile.tier,
        };

        // The tier floor raises the effective admission threshold.
        let effective_min = policy.min_score.max(config.mid_threshold);

        let over_daily = snapshot.daily_used_cents + estimate > policy.daily_cents;
        let over_monthly = snapshot.monthly_used_cents + estimate > policy.monthly_cents;
        if over_daily || over_monthly {
            return Decision {
                ai_worthy: false,
                reason: DecisionReason::BudgetExhausted,
                estimated_cost_cents: estimate,
                could_be_enhanced: score >= effective_min,
                score,
                breakdown,
                budget,
                decided_at,
            };
        }

        if score >= config.high_threshold && score >= policy.min_score {
            return Decision {
                ai_worthy: true,
                reason: DecisionReason::HighWorthiness,
                estimated_cost_cents: estimate,
                could_be_enhanced: true,
                score,
                breakdown,
                budget,
                decided_at,
            };
        }

        if score >= effective_min {
            let band = (config.high_threshold - config.mid_threshold).max(f64::EPSILON);
            let admit_probability = ((score - config.mid_threshold) / band).clamp(0.0, 1.0);
            let draw = seeded_unit(&pulse.pulse_id);
            let admitted = draw < admit_probability;
            debug!(
                pulse_id = %pulse.pulse_id,
                score,
                admit_probability,
                draw,
                admitted,
                "probabilistic admission draw"
            );
            if admitted {
                return Decision {
                    ai_worthy: true,
                    reason: DecisionReason::Probabilistic,
                    estimated_cost_cents: estimate,
                    could_be_enhanced: true,
                    score,
                    breakdown,
                    budget,
                    decided_at,
                };
            }
        }

        Decision {
            ai_worthy: false,
            reason: DecisionReason::BelowThreshold,
            estimated_cost_cents: estimate,
            could_be_enhanced: false,
            score,
            breakdown,
            budget,
            decided_at,
        }
    }

    /// The fallback decision when config or ledger cannot be read: behave
    /// as if AI were disabled, but keep a defaults-scored record so the
    /// ingested pulse still carries a meaningful score.
    fn degraded(
        &self,
        pulse: &StoppedPulse,
        profile: &UserProfile,
        history: &HistorySummary,
        decided_at: chrono::DateTime<chrono::Utc>,
    ) -> Decision {
        let breakdown = score_pulse(pulse, history, &ScoringConfig::default());
        Decision {
            ai_worthy: false,
            reason: DecisionReason::Degraded,
            estimated_cost_cents: 0,
            could_be_enhanced: false,
            score: breakdown.total,
            breakdown,
            budget: BudgetState {
                daily_used_cents: 0,
                monthly_used_cents: 0,
                tier: profile.tier,
            },
            decided_at,
        }
    }

    async fn read_ledger(
        &self,
        user_id: &str,
    ) -> std::result::Result<crate::ledger::BudgetSnapshot, String> {
        let mut last = String::new();
        for attempt in 0..2 {
            match self.ledger.read(user_id).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => {
                    last = err.to_string();
                    if attempt == 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                    }
                }
            }
        }
        Err(last)
    }

    /// Upper-bound cost estimate from the primary model's tariff and the
    /// pulse's field lengths, clamped to the configured per-pulse cap.
    fn estimate_cents(&self, pulse: &StoppedPulse, config: &PipelineConfig) -> u32 {
        let prompt_chars = PROMPT_OVERHEAD_CHARS
            + pulse.intent.chars().count()
            + pulse.reflection.chars().count();
        self.tariffs
            .estimate_cents(&config.model.primary, prompt_chars, MAX_OUTPUT_TOKENS)
            .clamp(1, config.max_cost_per_pulse_cents.max(1))
    }
}

/// A deterministic draw in `[0, 1)` seeded by pulse id, so replaying a
/// completion event reproduces the same probabilistic outcome.
fn seeded_unit(pulse_id: &str) -> f64 {
    let mut hasher = FnvHasher::default();
    hasher.write(pulse_id.as_bytes());
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{ConfigSource, ConfigFetchError, StaticConfigSource};
    use crate::ledger::{BudgetSnapshot, ChargeOutcome, LedgerError, MemoryLedger, WindowCaps};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
        ))
    }

    fn controller_with(
        overrides: HashMap<String, String>,
        ledger: Arc<dyn BudgetLedger>,
        clock: Arc<FixedClock>,
    ) -> AdmissionController {
        let resolver = Arc::new(ConfigResolver::new(
            Arc::new(StaticConfigSource::new(overrides)),
            PipelineConfig::default(),
        ));
        AdmissionController::new(resolver, ledger, Arc::new(TariffTable::builtin()), clock)
    }

    fn pulse(id: &str, user: &str, intent: &str, reflection: &str, seconds: u32) -> StoppedPulse {
        let start = Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap();
        StoppedPulse {
            pulse_id: id.into(),
            user_id: user.into(),
            intent: intent.into(),
            intent_emotion: None,
            start_time: start,
            duration_seconds: seconds.max(1),
            reflection: reflection.into(),
            reflection_emotion: None,
            stopped_at: start + chrono::Duration::seconds(i64::from(seconds)),
            effective_duration_seconds: seconds,
        }
    }

    fn rich_pulse(id: &str, user: &str) -> StoppedPulse {
        pulse(
            id,
            user,
            &"plan the architecture review ".repeat(6),
            &format!("finally a breakthrough on the design. {}", "x".repeat(160)),
            1800,
        )
    }

    #[tokio::test]
    async fn kill_switch_wins_over_everything() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let controller = controller_with(
            HashMap::from([("ai.enabled".to_string(), "false".to_string())]),
            ledger,
            clock,
        );

        let profile = UserProfile::new("u-1").with_tier(pulseforge_types::UserTier::Unlimited);
        let decision = controller
            .decide(&rich_pulse("p-1", "u-1"), &profile, &HistorySummary::default())
            .await;

        assert!(!decision.ai_worthy);
        assert_eq!(decision.reason, DecisionReason::GloballyDisabled);
    }

    #[tokio::test]
    async fn trivial_free_pulse_is_below_threshold() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let controller = controller_with(HashMap::new(), ledger, clock);

        let profile = UserProfile::new("u1");
        let history = HistorySummary {
            completions_today: 2,
            ..Default::default()
        };
        let decision = controller
            .decide(&pulse("p1", "u1", "note", "", 120), &profile, &history)
            .await;

        assert!(!decision.ai_worthy);
        assert_eq!(decision.reason, DecisionReason::BelowThreshold);
        assert!(!decision.could_be_enhanced);
        assert!(decision.score < 0.4);
        assert!(decision.estimated_cost_cents >= 1);
    }

    #[tokio::test]
    async fn rich_premium_pulse_is_high_worthiness() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let controller = controller_with(HashMap::new(), ledger, clock);

        let profile = UserProfile::new("u2").with_tier(pulseforge_types::UserTier::Premium);
        let decision = controller
            .decide(&rich_pulse("p2", "u2"), &profile, &HistorySummary::default())
            .await;

        assert!(decision.ai_worthy);
        assert_eq!(decision.reason, DecisionReason::HighWorthiness);
        assert!(decision.score >= 0.8);
        assert!(
            decision.estimated_cost_cents >= 1
                && decision.estimated_cost_cents <= 2
        );
    }

    #[tokio::test]
    async fn exhausted_budget_rejects_with_could_be_enhanced() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        // Consume the free monthly sample quota up front.
        ledger
            .charge(
                "u3",
                8,
                "p-prior",
                &WindowCaps {
                    daily_cents: 100,
                    monthly_cents: 100,
                },
            )
            .await
            .unwrap();

        let controller = controller_with(HashMap::new(), ledger, clock);
        let profile = UserProfile::new("u3");
        let decision = controller
            .decide(&rich_pulse("p3", "u3"), &profile, &HistorySummary::default())
            .await;

        assert!(!decision.ai_worthy);
        assert_eq!(decision.reason, DecisionReason::BudgetExhausted);
        assert!(decision.could_be_enhanced);
        assert_eq!(decision.budget.monthly_used_cents, 8);
    }

    #[tokio::test]
    async fn probabilistic_band_is_deterministic_per_pulse_id() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let controller = controller_with(HashMap::new(), ledger, clock);

        // Mid-band score: decent content and duration, no breakthrough.
        let profile = UserProfile::new("u4").with_tier(pulseforge_types::UserTier::Premium);
        let mid_pulse = |id: &str| {
            pulse(
                id,
                "u4",
                &"work through the backlog ".repeat(5),
                "made steady progress on several items",
                1200,
            )
        };

        let first = controller
            .decide(&mid_pulse("p-seed"), &profile, &HistorySummary::default())
            .await;
        assert!(first.score >= 0.4 && first.score < 0.8, "score {}", first.score);

        for _ in 0..5 {
            let again = controller
                .decide(&mid_pulse("p-seed"), &profile, &HistorySummary::default())
                .await;
            assert_eq!(again.ai_worthy, first.ai_worthy);
            assert_eq!(again.reason, first.reason);
        }

        // Across many pulse ids the draw must actually vary.
        let mut admitted = 0;
        let mut rejected = 0;
        for i in 0..100 {
            let decision = controller
                .decide(
                    &mid_pulse(&format!("p-var-{i}")),
                    &profile,
                    &HistorySummary::default(),
                )
                .await;
            match decision.reason {
                DecisionReason::Probabilistic => admitted += 1,
                DecisionReason::BelowThreshold => rejected += 1,
                other => panic!("unexpected reason {other}"),
            }
        }
        assert!(admitted > 0, "no pulse admitted probabilistically");
        assert!(rejected > 0, "no pulse rejected in the band");
    }

    #[tokio::test]
    async fn free_tier_floor_blocks_mid_band_scores() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let controller = controller_with(HashMap::new(), ledger, clock);

        // Mid-band score on the free tier (floor 0.75): rule path.
        let profile = UserProfile::new("u5");
        let decision = controller
            .decide(
                &pulse(
                    "p5",
                    "u5",
                    &"work through the backlog ".repeat(5),
                    "made steady progress on several items",
                    1200,
                ),
                &profile,
                &HistorySummary {
                    completions_today: 1,
                    ..Default::default()
                },
            )
            .await;

        assert!(decision.score >= 0.4 && decision.score < 0.75);
        assert!(!decision.ai_worthy);
        assert_eq!(decision.reason, DecisionReason::BelowThreshold);
    }

    struct DownLedger;

    #[async_trait]
    impl BudgetLedger for DownLedger {
        async fn read(&self, _user_id: &str) -> Result<BudgetSnapshot, LedgerError> {
            Err(LedgerError("connection refused".into()))
        }
        async fn charge(
            &self,
            _user_id: &str,
            _cents: u32,
            _pulse_id: &str,
            _caps: &WindowCaps,
        ) -> Result<ChargeOutcome, LedgerError> {
            Err(LedgerError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_ledger_degrades() {
        let clock = fixed_clock();
        let controller = controller_with(HashMap::new(), Arc::new(DownLedger), clock);

        let profile = UserProfile::new("u6").with_tier(pulseforge_types::UserTier::Premium);
        let decision = controller
            .decide(&rich_pulse("p6", "u6"), &profile, &HistorySummary::default())
            .await;

        assert!(!decision.ai_worthy);
        assert_eq!(decision.reason, DecisionReason::Degraded);
        // The record still carries a score from default tunables.
        assert!(decision.score > 0.0);
    }

    struct DownConfig;

    #[async_trait]
    impl ConfigSource for DownConfig {
        async fn fetch(&self) -> Result<HashMap<String, String>, ConfigFetchError> {
            Err(ConfigFetchError("parameter store down".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_config_degrades() {
        let clock = fixed_clock();
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let resolver = Arc::new(ConfigResolver::new(
            Arc::new(DownConfig),
            PipelineConfig::default(),
        ));
        let controller = AdmissionController::new(
            resolver,
            ledger,
            Arc::new(TariffTable::builtin()),
            clock,
        );

        let profile = UserProfile::new("u7");
        let decision = controller
            .decide(&rich_pulse("p7", "u7"), &profile, &HistorySummary::default())
            .await;
        assert_eq!(decision.reason, DecisionReason::Degraded);
    }

    #[test]
    fn seeded_unit_is_stable_and_in_range() {
        let a1 = seeded_unit("pulse-a");
        let a2 = seeded_unit("pulse-a");
        let b = seeded_unit("pulse-b");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert!((0.0..1.0).contains(&a1));
        assert!((0.0..1.0).contains(&b));
    }

    #[test]
    fn selection_info_mirrors_decision() {
        let decision = Decision {
            ai_worthy: true,
            reason: DecisionReason::HighWorthiness,
            estimated_cost_cents: 2,
            could_be_enhanced: true,
            score: 0.91,
            breakdown: ScoreBreakdown {
                content_effort: 1.0,
                duration: 1.0,
                reflection_depth: 0.8,
                frequency_bonus: 0.5,
                total: 0.91,
            },
            budget: BudgetState {
                daily_used_cents: 2,
                monthly_used_cents: 4,
                tier: pulseforge_types::UserTier::Premium,
            },
            decided_at: Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
        };
        let info = decision.selection_info();
        assert_eq!(info.decision_reason, DecisionReason::HighWorthiness);
        assert_eq!(info.worthiness_score, 0.91);
        assert_eq!(info.estimated_cost_cents, 2);
        assert!(info.could_be_enhanced);
        assert_eq!(info.budget_snapshot.monthly_used_cents, 4);
    }
}
