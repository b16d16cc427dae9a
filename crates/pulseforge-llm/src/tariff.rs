//! Per-model token tariffs and cost derivation.
//!
//! Costs are integer cents end to end; tariffs are expressed in millicents
//! per 1K tokens so cheap models do not round to zero. Reconciled costs
//! round up and never drop below one cent for a non-empty completion, so
//! `ai_enhanced=true` always implies `ai_cost_cents > 0`.

use std::collections::HashMap;

use crate::types::Usage;

/// Token pricing for one model, in millicents per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tariff {
    /// Input (prompt) rate.
    pub input_millicents_per_1k: u64,
    /// Output (completion) rate.
    pub output_millicents_per_1k: u64,
}

/// Tariffs keyed by model id, with a conservative default for models the
/// table does not know.
#[derive(Debug, Clone)]
pub struct TariffTable {
    rates: HashMap<String, Tariff>,
    default_rate: Tariff,
}

impl TariffTable {
    /// Build a table from explicit rates and a default.
    pub fn new(rates: HashMap<String, Tariff>, default_rate: Tariff) -> Self {
        Self {
            rates,
            default_rate,
        }
    }

    /// The built-in table covering the default candidate models.
    pub fn builtin() -> Self {
        let rates = HashMap::from([
            (
                "anthropic/claude-haiku-3.5".to_string(),
                Tariff {
                    input_millicents_per_1k: 80,
                    output_millicents_per_1k: 400,
                },
            ),
            (
                "amazon/nova-lite".to_string(),
                Tariff {
                    input_millicents_per_1k: 6,
                    output_millicents_per_1k: 24,
                },
            ),
            (
                "amazon/titan-text-express".to_string(),
                Tariff {
                    input_millicents_per_1k: 20,
                    output_millicents_per_1k: 60,
                },
            ),
        ]);
        Self::new(
            rates,
            Tariff {
                input_millicents_per_1k: 100,
                output_millicents_per_1k: 500,
            },
        )
    }

    /// The tariff for a model, falling back to the default rate.
    pub fn rate_for(&self, model_id: &str) -> Tariff {
        self.rates
            .get(model_id)
            .copied()
            .unwrap_or(self.default_rate)
    }

    /// Actual cost in cents for reported usage, rounded up, minimum one
    /// cent when any tokens were consumed.
    pub fn cost_cents(&self, model_id: &str, usage: &Usage) -> u32 {
        let rate = self.rate_for(model_id);
        let millicents = u64::from(usage.prompt_tokens) * rate.input_millicents_per_1k / 1000
            + u64::from(usage.completion_tokens) * rate.output_millicents_per_1k / 1000;

        if usage.total_tokens == 0 {
            return 0;
        }
        (millicents.div_ceil(1000).max(1)) as u32
    }

    /// Upper-bound estimate in cents for a prompt of `input_chars`
    /// characters and at most `max_output_tokens` of completion.
    ///
    /// Uses the coarse 4-chars-per-token heuristic on the input side and
    /// charges the full output allowance; an upper bound, not a forecast.
    pub fn estimate_cents(
        &self,
        model_id: &str,
        input_chars: usize,
        max_output_tokens: u32,
    ) -> u32 {
        let input_tokens = (input_chars as u32).div_ceil(4);
        let usage = Usage {
            prompt_tokens: input_tokens,
            completion_tokens: max_output_tokens,
            total_tokens: input_tokens + max_output_tokens,
        };
        self.cost_cents(model_id, &usage)
    }
}

impl Default for TariffTable {
    fn default() -> Self {
        Self::builtin()
    }
}
