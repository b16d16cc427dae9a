//! User tiers, profiles, and the per-user history summary.

use serde::{Deserialize, Serialize};

/// Subscription tier controlling premium-enhancement quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    /// Small monthly sample quota; routine pulses fall to the rule path.
    #[default]
    Free,
    /// Paid tier with meaningful daily and monthly caps.
    Premium,
    /// Highest caps; still bounded to protect the global budget.
    Unlimited,
}

impl UserTier {
    /// The wire tag for this tier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Unlimited => "unlimited",
        }
    }
}

impl std::fmt::Display for UserTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user profile: tier, timezone, and lifetime aggregates.
///
/// Budget windows reset on calendar boundaries evaluated in the user's
/// timezone; the offset defaults to UTC when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Opaque user identifier.
    pub user_id: String,

    /// Subscription tier.
    #[serde(default)]
    pub tier: UserTier,

    /// Fixed UTC offset in minutes for window resets. 0 = UTC.
    #[serde(default)]
    pub tz_offset_minutes: i32,

    /// Total pulses this user has completed.
    #[serde(default)]
    pub total_completed: u64,

    /// Lifetime count of AI-enhanced pulses.
    #[serde(default)]
    pub lifetime_ai_enhanced: u64,
}

impl UserProfile {
    /// A profile with the given id on the free tier, UTC resets.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: UserTier::Free,
            tz_offset_minutes: 0,
            total_completed: 0,
            lifetime_ai_enhanced: 0,
        }
    }

    /// Builder-style tier override.
    pub fn with_tier(mut self, tier: UserTier) -> Self {
        self.tier = tier;
        self
    }
}

/// Light historical context handed to the worthiness scorer.
///
/// When the history lookup fails, the pipeline proceeds with
/// `HistorySummary::default()` (all zeros) rather than dropping the pulse.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Completions by this user in the current day.
    pub completions_today: u32,

    /// AI-enhanced pulses in the trailing 7 days.
    pub ai_enhanced_last_7_days: u32,

    /// Rolling mean effective duration in seconds.
    pub mean_duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_wire_tags() {
        assert_eq!(UserTier::Free.as_str(), "free");
        assert_eq!(UserTier::Premium.as_str(), "premium");
        assert_eq!(UserTier::Unlimited.as_str(), "unlimited");
        assert_eq!(
            serde_json::to_string(&UserTier::Premium).unwrap(),
            "\"premium\""
        );
    }

    #[test]
    fn profile_defaults() {
        let profile = UserProfile::new("u-1");
        assert_eq!(profile.tier, UserTier::Free);
        assert_eq!(profile.tz_offset_minutes, 0);
        assert_eq!(profile.total_completed, 0);
    }

    #[test]
    fn profile_with_tier() {
        let profile = UserProfile::new("u-1").with_tier(UserTier::Unlimited);
        assert_eq!(profile.tier, UserTier::Unlimited);
    }

    #[test]
    fn history_default_is_zeroed() {
        let history = HistorySummary::default();
        assert_eq!(history.completions_today, 0);
        assert_eq!(history.ai_enhanced_last_7_days, 0);
        assert_eq!(history.mean_duration_seconds, 0.0);
    }

    #[test]
    fn profile_deserializes_with_missing_optionals() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"user_id":"u-9"}"#).unwrap();
        assert_eq!(profile.user_id, "u-9");
        assert_eq!(profile.tier, UserTier::Free);
    }
}
