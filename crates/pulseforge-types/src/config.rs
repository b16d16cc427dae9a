//! Pipeline configuration schema.
//!
//! [`PipelineConfig`] is the typed snapshot the config resolver publishes.
//! It deserializes from TOML/JSON with defaults for every field, and it can
//! also be patched from the flat logical key/value pairs served by the
//! configuration store (`ai.enabled`, `ai.weight.duration`, ...).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::UserTier;

// ── Scoring ─────────────────────────────────────────────────────────────

/// Weights of the four worthiness sub-scores. They are expected to sum to
/// roughly 1.0 but the scorer clamps its output either way.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Content-effort weight (combined intent + reflection length).
    #[serde(default = "default_weight_intent")]
    pub intent: f64,
    /// Duration weight.
    #[serde(default = "default_weight_duration")]
    pub duration: f64,
    /// Reflection-depth weight.
    #[serde(default = "default_weight_reflection")]
    pub reflection: f64,
    /// Frequency-bonus weight.
    #[serde(default = "default_weight_frequency")]
    pub frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            intent: default_weight_intent(),
            duration: default_weight_duration(),
            reflection: default_weight_reflection(),
            frequency: default_weight_frequency(),
        }
    }
}

fn default_weight_intent() -> f64 {
    0.40
}
fn default_weight_duration() -> f64 {
    0.30
}
fn default_weight_reflection() -> f64 {
    0.20
}
fn default_weight_frequency() -> f64 {
    0.10
}

/// Tunables for the worthiness scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Sub-score weights.
    #[serde(default)]
    pub weights: ScoreWeights,

    /// Combined intent+reflection length at which content-effort saturates.
    #[serde(default = "default_content_saturation_chars")]
    pub content_saturation_chars: u32,

    /// Effective duration at which the duration sub-score saturates.
    #[serde(default = "default_duration_saturation_seconds")]
    pub duration_saturation_seconds: u32,

    /// Sessions shorter than this score zero on duration.
    #[serde(default = "default_duration_floor_seconds")]
    pub duration_floor_seconds: u32,

    /// Daily completion count beyond which the frequency bonus is zero.
    #[serde(default = "default_daily_frequency_cap")]
    pub daily_frequency_cap: u32,

    /// Affect/insight vocabulary that marks a breakthrough reflection.
    /// Data, not code: override via configuration.
    #[serde(default = "default_breakthrough_tokens")]
    pub breakthrough_tokens: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            content_saturation_chars: default_content_saturation_chars(),
            duration_saturation_seconds: default_duration_saturation_seconds(),
            duration_floor_seconds: default_duration_floor_seconds(),
            daily_frequency_cap: default_daily_frequency_cap(),
            breakthrough_tokens: default_breakthrough_tokens(),
        }
    }
}

fn default_content_saturation_chars() -> u32 {
    400
}
fn default_duration_saturation_seconds() -> u32 {
    1800
}
fn default_duration_floor_seconds() -> u32 {
    60
}
fn default_daily_frequency_cap() -> u32 {
    3
}
fn default_breakthrough_tokens() -> Vec<String> {
    [
        "breakthrough",
        "realized",
        "realised",
        "insight",
        "finally",
        "clarity",
        "unlocked",
        "discovered",
        "aha",
        "eureka",
        "clicked",
        "understood",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

// ── Tiers ───────────────────────────────────────────────────────────────

/// Per-tier budget caps and admission floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Daily premium-spend cap in cents.
    pub daily_cents: u32,
    /// Monthly premium-spend cap in cents.
    pub monthly_cents: u32,
    /// Minimum worthiness score for admission on this tier.
    pub min_score: f64,
}

/// Policies for every tier. A struct rather than a map so that an unknown
/// tier cannot exist at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicies {
    #[serde(default = "default_free_policy")]
    pub free: TierPolicy,
    #[serde(default = "default_premium_policy")]
    pub premium: TierPolicy,
    #[serde(default = "default_unlimited_policy")]
    pub unlimited: TierPolicy,
}

impl TierPolicies {
    /// The policy for a tier. Total over [`UserTier`].
    pub fn for_tier(&self, tier: UserTier) -> TierPolicy {
        match tier {
            UserTier::Free => self.free,
            UserTier::Premium => self.premium,
            UserTier::Unlimited => self.unlimited,
        }
    }
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            free: default_free_policy(),
            premium: default_premium_policy(),
            unlimited: default_unlimited_policy(),
        }
    }
}

// Free tier: a small monthly sample (~4 premium enhancements at the 2¢
// estimate) and a floor high enough that routine pulses take the rule path.
fn default_free_policy() -> TierPolicy {
    TierPolicy {
        daily_cents: 5,
        monthly_cents: 8,
        min_score: 0.75,
    }
}
fn default_premium_policy() -> TierPolicy {
    TierPolicy {
        daily_cents: 18,
        monthly_cents: 360,
        min_score: 0.40,
    }
}
fn default_unlimited_policy() -> TierPolicy {
    TierPolicy {
        daily_cents: 75,
        monthly_cents: 1500,
        min_score: 0.25,
    }
}

// ── Model ───────────────────────────────────────────────────────────────

/// Model-invocation settings for the premium enhancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Preferred model id, "provider/model" form.
    #[serde(default = "default_primary_model")]
    pub primary: String,

    /// Ordered fallbacks; the last entry is the universal model that is
    /// always entitled, so candidate probing terminates.
    #[serde(default = "default_fallback_models")]
    pub fallbacks: Vec<String>,

    /// Per-call wall-clock timeout in seconds.
    #[serde(default = "default_model_timeout_seconds")]
    pub timeout_seconds: u64,

    /// How long a discovered working model stays cached.
    #[serde(default = "default_choice_ttl_seconds")]
    pub choice_ttl_seconds: u64,

    /// Upstream concurrency limit (token bucket size).
    #[serde(default = "default_model_concurrency")]
    pub concurrency: usize,

    /// Bounded retry attempts per model call.
    #[serde(default = "default_model_retry_attempts")]
    pub retry_attempts: u32,
}

impl ModelConfig {
    /// Primary followed by fallbacks, in probe order.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.fallbacks.len());
        out.push(self.primary.clone());
        out.extend(self.fallbacks.iter().cloned());
        out
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_model(),
            fallbacks: default_fallback_models(),
            timeout_seconds: default_model_timeout_seconds(),
            choice_ttl_seconds: default_choice_ttl_seconds(),
            concurrency: default_model_concurrency(),
            retry_attempts: default_model_retry_attempts(),
        }
    }
}

fn default_primary_model() -> String {
    "anthropic/claude-haiku-3.5".into()
}
fn default_fallback_models() -> Vec<String> {
    vec!["amazon/nova-lite".into(), "amazon/titan-text-express".into()]
}
fn default_model_timeout_seconds() -> u64 {
    90
}
fn default_choice_ttl_seconds() -> u64 {
    300
}
fn default_model_concurrency() -> usize {
    4
}
fn default_model_retry_attempts() -> u32 {
    3
}

// ── Root ────────────────────────────────────────────────────────────────

/// The typed configuration snapshot consumed across the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global kill switch for premium enhancement.
    #[serde(default = "default_ai_enabled")]
    pub ai_enabled: bool,

    /// Aspirational admission ratio; diagnostic only.
    #[serde(default = "default_target_percentage")]
    pub target_percentage: f64,

    /// Worthiness scorer tunables.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Score at or above which admission is deterministic.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Score at or above which admission is probabilistic.
    #[serde(default = "default_mid_threshold")]
    pub mid_threshold: f64,

    /// Upper bound on the published cost estimate, in cents.
    #[serde(default = "default_max_cost_per_pulse_cents")]
    pub max_cost_per_pulse_cents: u32,

    /// Model-invocation settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Per-tier caps and floors.
    #[serde(default)]
    pub tiers: TierPolicies,

    /// Orchestrator worker-pool size.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// End-to-end wall-clock budget per event, in seconds.
    #[serde(default = "default_event_deadline_seconds")]
    pub event_deadline_seconds: u64,

    /// Bounded retry attempts at the enhancer and writer boundaries.
    #[serde(default = "default_step_retry_attempts")]
    pub step_retry_attempts: u32,

    /// TTL of the resolver's config snapshot, in seconds.
    #[serde(default = "default_config_ttl_seconds")]
    pub config_ttl_seconds: u64,

    /// Capacity of the orchestrator's pulse-id dedupe LRU.
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_enabled: default_ai_enabled(),
            target_percentage: default_target_percentage(),
            scoring: ScoringConfig::default(),
            high_threshold: default_high_threshold(),
            mid_threshold: default_mid_threshold(),
            max_cost_per_pulse_cents: default_max_cost_per_pulse_cents(),
            model: ModelConfig::default(),
            tiers: TierPolicies::default(),
            worker_concurrency: default_worker_concurrency(),
            event_deadline_seconds: default_event_deadline_seconds(),
            step_retry_attempts: default_step_retry_attempts(),
            config_ttl_seconds: default_config_ttl_seconds(),
            dedupe_capacity: default_dedupe_capacity(),
        }
    }
}

fn default_ai_enabled() -> bool {
    true
}
fn default_target_percentage() -> f64 {
    0.10
}
fn default_high_threshold() -> f64 {
    0.8
}
fn default_mid_threshold() -> f64 {
    0.4
}
fn default_max_cost_per_pulse_cents() -> u32 {
    2
}
fn default_worker_concurrency() -> usize {
    16
}
fn default_event_deadline_seconds() -> u64 {
    300
}
fn default_step_retry_attempts() -> u32 {
    3
}
fn default_config_ttl_seconds() -> u64 {
    60
}
fn default_dedupe_capacity() -> usize {
    4096
}

/// A flat config key could not be applied.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigKeyError {
    /// The key is not in the logical key table.
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// The raw value could not be coerced to the key's type.
    #[error("invalid value for {key}: {raw:?}")]
    InvalidValue { key: String, raw: String },
}

impl PipelineConfig {
    /// Apply one flat logical key from the configuration store.
    ///
    /// Values arrive as strings and are coerced here. Unknown keys are an
    /// error so the resolver can log and skip them without guessing.
    pub fn apply_key(&mut self, key: &str, raw: &str) -> Result<(), ConfigKeyError> {
        let invalid = || ConfigKeyError::InvalidValue {
            key: key.to_string(),
            raw: raw.to_string(),
        };

        match key {
            "ai.enabled" => self.ai_enabled = parse_bool(raw).ok_or_else(invalid)?,
            "ai.target_percentage" => {
                self.target_percentage = raw.parse().map_err(|_| invalid())?
            }
            "ai.weight.duration" => {
                self.scoring.weights.duration = raw.parse().map_err(|_| invalid())?
            }
            "ai.weight.reflection" => {
                self.scoring.weights.reflection = raw.parse().map_err(|_| invalid())?
            }
            "ai.weight.intent" => {
                self.scoring.weights.intent = raw.parse().map_err(|_| invalid())?
            }
            "ai.weight.frequency" => {
                self.scoring.weights.frequency = raw.parse().map_err(|_| invalid())?
            }
            "ai.high_threshold" => self.high_threshold = raw.parse().map_err(|_| invalid())?,
            "ai.mid_threshold" => self.mid_threshold = raw.parse().map_err(|_| invalid())?,
            "ai.max_cost_per_pulse_cents" => {
                self.max_cost_per_pulse_cents = raw.parse().map_err(|_| invalid())?
            }
            "ai.model.primary" => self.model.primary = raw.trim().to_string(),
            "ai.model.fallbacks" => {
                self.model.fallbacks = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "pipeline.worker_concurrency" => {
                self.worker_concurrency = raw.parse().map_err(|_| invalid())?
            }
            "pipeline.event_deadline_seconds" => {
                self.event_deadline_seconds = raw.parse().map_err(|_| invalid())?
            }
            _ => {
                if let Some(rest) = key.strip_prefix("ai.tier.") {
                    return self.apply_tier_key(key, rest, raw);
                }
                return Err(ConfigKeyError::UnknownKey(key.to_string()));
            }
        }
        Ok(())
    }

    fn apply_tier_key(
        &mut self,
        full_key: &str,
        rest: &str,
        raw: &str,
    ) -> Result<(), ConfigKeyError> {
        let invalid = || ConfigKeyError::InvalidValue {
            key: full_key.to_string(),
            raw: raw.to_string(),
        };
        let unknown = || ConfigKeyError::UnknownKey(full_key.to_string());

        let (tier_name, field) = rest.split_once('.').ok_or_else(unknown)?;
        let policy = match tier_name {
            "free" => &mut self.tiers.free,
            "premium" => &mut self.tiers.premium,
            "unlimited" => &mut self.tiers.unlimited,
            _ => return Err(unknown()),
        };
        match field {
            "daily_cents" => policy.daily_cents = raw.parse().map_err(|_| invalid())?,
            "monthly_cents" => policy.monthly_cents = raw.parse().map_err(|_| invalid())?,
            "min_score" => policy.min_score = raw.parse().map_err(|_| invalid())?,
            _ => return Err(unknown()),
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
