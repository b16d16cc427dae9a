//! The two enhancement producers.
//!
//! Both paths share the [`EnhancedFields`] output contract; the premium
//! variant additionally carries cost and model metadata. The orchestrator
//! picks exactly one variant per event at the selection site.

pub mod premium;
pub mod rules;

use pulseforge_types::EnhancedFields;

/// Output-token allowance for a premium call; also the output bound used
/// by the admission-time cost estimate.
pub const MAX_OUTPUT_TOKENS: u32 = 350;

/// Cost and model metadata from a successful premium enhancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremiumMeta {
    /// The model that served the request.
    pub model_id: String,
    /// Prompt tokens reported by the model.
    pub input_tokens: u32,
    /// Completion tokens reported by the model.
    pub output_tokens: u32,
    /// Wall-clock latency of the model call.
    pub latency_ms: u64,
    /// Reconciled cost in cents; always at least 1.
    pub actual_cost_cents: u32,
}

/// One enhancement outcome, tagged by path.
#[derive(Debug, Clone, PartialEq)]
pub enum Enhancement {
    /// Model-backed enhancement with insights and cost metadata.
    Premium {
        fields: EnhancedFields,
        meta: PremiumMeta,
    },
    /// Deterministic rule-based enhancement; no insights, no cost.
    Rule { fields: EnhancedFields },
}

impl Enhancement {
    /// The shared output fields, whichever path produced them.
    pub fn fields(&self) -> &EnhancedFields {
        match self {
            Self::Premium { fields, .. } | Self::Rule { fields } => fields,
        }
    }

    /// Consume the enhancement, returning its fields.
    pub fn into_fields(self) -> EnhancedFields {
        match self {
            Self::Premium { fields, .. } | Self::Rule { fields } => fields,
        }
    }

    /// The reconciled cost; zero on the rule path.
    pub fn cost_cents(&self) -> u32 {
        match self {
            Self::Premium { meta, .. } => meta.actual_cost_cents,
            Self::Rule { .. } => 0,
        }
    }

    /// Premium metadata, when present.
    pub fn premium_meta(&self) -> Option<&PremiumMeta> {
        match self {
            Self::Premium { meta, .. } => Some(meta),
            Self::Rule { .. } => None,
        }
    }
}
