//! Model pricing and usage-based cost accounting
//!
//! All rates are expressed in USD per one million tokens. Every lookup
//! resolves: unknown or missing model identifiers price as the designated
//! fallback model, so a pricing-table gap never interrupts a long-running
//! session. A model entry may omit rate categories; absent categories cost
//! nothing for that model. The fallback entry must define all five.
//!
//! The table is an immutable value built once at startup and handed out as
//! `Arc<PricingTable>`; there is no process-global state.
//!
//! # Examples
//!
//! ```
//! use harforge_core::pricing::{PricingTable, TokenUsage};
//!
//! let table = PricingTable::builtin();
//! let usage = TokenUsage {
//!     input: 1_000_000,
//!     output: 1_000_000,
//!     ..Default::default()
//! };
//!
//! // Opus 4.5: $15 input + $75 output = $90
//! assert_eq!(table.cost(Some("claude-opus-4-5"), &usage), 90.0);
//!
//! // Unknown models price as the fallback (sonnet)
//! assert_eq!(table.cost(Some("mystery-model"), &usage), 18.0);
//! ```

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Model identifier used when the requested model is absent from the table
pub const FALLBACK_MODEL: &str = "claude-sonnet-4-5";

/// Per-million-token rates for one model
///
/// Absent categories contribute zero cost for that model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input: Option<f64>,
    pub output: Option<f64>,
    pub cache_creation: Option<f64>,
    pub cache_read: Option<f64>,
    pub reasoning: Option<f64>,
}

impl ModelRates {
    /// True when all five rate categories are defined
    pub fn is_complete(&self) -> bool {
        self.input.is_some()
            && self.output.is_some()
            && self.cache_creation.is_some()
            && self.cache_read.is_some()
            && self.reasoning.is_some()
    }

    fn has_negative(&self) -> bool {
        [
            self.input,
            self.output,
            self.cache_creation,
            self.cache_read,
            self.reasoning,
        ]
        .iter()
        .any(|rate| rate.is_some_and(|r| r < 0.0))
    }
}

/// Token counts for one usage report
///
/// Field aliases match the agent stream's usage payload so a report can be
/// deserialized directly from a message line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, alias = "input_tokens")]
    pub input: u64,
    #[serde(default, alias = "output_tokens")]
    pub output: u64,
    #[serde(
        default,
        alias = "cache_creation_tokens",
        alias = "cache_creation_input_tokens"
    )]
    pub cache_creation: u64,
    #[serde(default, alias = "cache_read_tokens", alias = "cache_read_input_tokens")]
    pub cache_read: u64,
    #[serde(default, alias = "reasoning_tokens", alias = "reasoning_output_tokens")]
    pub reasoning: u64,
}

impl TokenUsage {
    /// Sum of all token categories
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read + self.reasoning
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input += other.input;
        self.output += other.output;
        self.cache_creation += other.cache_creation;
        self.cache_read += other.cache_read;
        self.reasoning += other.reasoning;
    }
}

/// Shape of a pricing override file (TOML)
#[derive(Debug, Deserialize)]
struct RawPricingTable {
    fallback: String,
    models: HashMap<String, ModelRates>,
}

/// Immutable model pricing table with a designated fallback entry
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelRates>,
    fallback_id: String,
    fallback_rates: ModelRates,
}

impl PricingTable {
    /// Built-in pricing table
    ///
    /// Sonnet is the fallback as the most commonly used model.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();

        let sonnet = ModelRates {
            input: Some(3.00),
            output: Some(15.00),
            cache_creation: Some(3.75),
            cache_read: Some(0.30),
            reasoning: Some(15.00),
        };
        models.insert(FALLBACK_MODEL.to_string(), sonnet);

        models.insert(
            "claude-opus-4-5".to_string(),
            ModelRates {
                input: Some(15.00),
                output: Some(75.00),
                cache_creation: Some(18.75),
                cache_read: Some(1.50),
                reasoning: Some(75.00),
            },
        );

        models.insert(
            "claude-haiku-4-5".to_string(),
            ModelRates {
                input: Some(1.00),
                output: Some(5.00),
                cache_creation: Some(1.25),
                cache_read: Some(0.10),
                reasoning: Some(5.00),
            },
        );

        models.insert(
            "google-gemini-3-flash".to_string(),
            ModelRates {
                input: Some(0.00015),
                output: Some(0.0006),
                ..Default::default()
            },
        );

        models.insert(
            "google-gemini-3-pro".to_string(),
            ModelRates {
                input: Some(0.0003),
                output: Some(0.0012),
                ..Default::default()
            },
        );

        Self {
            fallback_id: FALLBACK_MODEL.to_string(),
            fallback_rates: sonnet,
            models,
        }
    }

    /// Build a table from explicit entries, validating the fallback invariant
    pub fn new(
        models: HashMap<String, ModelRates>,
        fallback_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let fallback_id = fallback_id.into();

        let fallback_rates = *models.get(&fallback_id).ok_or_else(|| {
            CoreError::InvalidPricing {
                message: format!("fallback model '{fallback_id}' has no entry"),
            }
        })?;

        if !fallback_rates.is_complete() {
            return Err(CoreError::InvalidPricing {
                message: format!("fallback model '{fallback_id}' must define all rate categories"),
            });
        }

        if let Some(id) = models
            .iter()
            .find(|(_, rates)| rates.has_negative())
            .map(|(id, _)| id)
        {
            return Err(CoreError::InvalidPricing {
                message: format!("model '{id}' has a negative rate"),
            });
        }

        Ok(Self {
            models,
            fallback_id,
            fallback_rates,
        })
    }

    /// Parse a TOML pricing override
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let raw: RawPricingTable =
            toml::from_str(text).map_err(|e| CoreError::InvalidPricing {
                message: e.to_string(),
            })?;
        Self::new(raw.models, raw.fallback)
    }

    /// Load a TOML pricing override from disk
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rates for a model, falling back for unknown or missing identifiers
    pub fn rates_for(&self, model_id: Option<&str>) -> &ModelRates {
        model_id
            .and_then(|id| self.models.get(id))
            .unwrap_or(&self.fallback_rates)
    }

    /// Calculate cost in USD for one usage report
    ///
    /// Each category contributes `(tokens / 1M) * rate`; categories without
    /// a rate for the resolved model contribute zero.
    pub fn cost(&self, model_id: Option<&str>, usage: &TokenUsage) -> f64 {
        let rates = self.rates_for(model_id);

        per_million(usage.input, rates.input)
            + per_million(usage.output, rates.output)
            + per_million(usage.cache_creation, rates.cache_creation)
            + per_million(usage.cache_read, rates.cache_read)
            + per_million(usage.reasoning, rates.reasoning)
    }

    /// Identifier of the designated fallback model
    pub fn fallback_model(&self) -> &str {
        &self.fallback_id
    }

    /// Iterate all entries (unordered)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelRates)> {
        self.models.iter().map(|(id, rates)| (id.as_str(), rates))
    }
}

fn per_million(tokens: u64, rate: Option<f64>) -> f64 {
    match rate {
        Some(rate) => (tokens as f64 / 1_000_000.0) * rate,
        None => 0.0,
    }
}
