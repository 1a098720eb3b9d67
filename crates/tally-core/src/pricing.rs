//! Pricing calculator for metered resources.
//!
//! Pure table-driven arithmetic: no I/O, deterministic, integer-only. The
//! same function prices both the pre-flight estimate and the actual cost
//! recomputed after real consumption is known.
//!
//! Unknown resources or tiers fail closed with [`PricingError::UnknownPricingKey`];
//! a silent zero-cost default is a revenue-loss bug class this module guards
//! against explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a request is routed upstream, which scales its price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Default routing.
    Standard,

    /// Low-latency routing at a premium.
    Priority,

    /// Batched/off-peak routing at a discount.
    Economy,

    /// Caller brings their own upstream credentials. No credits charged.
    BringYourOwn,
}

/// Rate table entry for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRate {
    /// Quantity units covered by one application of `rate_milli`
    /// (e.g. 1_000_000 for per-million-token rates).
    pub unit_size: i64,

    /// Milli-credits per `unit_size` units, before multipliers.
    pub rate_milli: i64,

    /// Optional minimum charge in milli-credits. Applied after multipliers,
    /// including to zero-quantity requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_milli: Option<i64>,
}

/// Injected pricing tables.
///
/// All multipliers are per-mille integers so the whole computation stays in
/// exact integer arithmetic. Tables are configuration, loadable from JSON;
/// pricing changes never require touching the calculator logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Base rates keyed by resource type.
    pub resource_rates: HashMap<String, ResourceRate>,

    /// Per-mille multiplier per routing mode (1000 = neutral).
    pub mode_multipliers_permille: HashMap<RoutingMode, i64>,

    /// Per-mille markup per tier (0 = no markup), keyed by plan code.
    pub tier_markups_permille: HashMap<String, i64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut resource_rates = HashMap::new();

        resource_rates.insert(
            "llm_input_tokens".to_string(),
            ResourceRate {
                unit_size: 1_000_000,
                rate_milli: 300_000, // 300 credits per 1M input tokens
                floor_milli: None,
            },
        );
        resource_rates.insert(
            "llm_output_tokens".to_string(),
            ResourceRate {
                unit_size: 1_000_000,
                rate_milli: 1_500_000, // 1500 credits per 1M output tokens
                floor_milli: None,
            },
        );
        resource_rates.insert(
            "api_call".to_string(),
            ResourceRate {
                unit_size: 1_000,
                rate_milli: 1_000, // 1 credit per 1000 calls
                floor_milli: None,
            },
        );
        resource_rates.insert(
            "embedding_tokens".to_string(),
            ResourceRate {
                unit_size: 1_000_000,
                rate_milli: 20_000,
                floor_milli: None,
            },
        );
        resource_rates.insert(
            "storage_gb_hour".to_string(),
            ResourceRate {
                unit_size: 1,
                rate_milli: 2_000,
                floor_milli: None,
            },
        );

        let mut mode_multipliers_permille = HashMap::new();
        mode_multipliers_permille.insert(RoutingMode::Standard, 1_000);
        mode_multipliers_permille.insert(RoutingMode::Priority, 1_500);
        mode_multipliers_permille.insert(RoutingMode::Economy, 500);

        let mut tier_markups_permille = HashMap::new();
        tier_markups_permille.insert("free".to_string(), 200);
        tier_markups_permille.insert("standard".to_string(), 100);
        tier_markups_permille.insert("pro".to_string(), 0);
        tier_markups_permille.insert("enterprise".to_string(), 0);

        Self {
            resource_rates,
            mode_multipliers_permille,
            tier_markups_permille,
        }
    }
}

impl PricingConfig {
    /// Price `quantity` units of `resource_type` in milli-credits.
    ///
    /// `credits = quantity / unit_size * rate * mode_multiplier * (1 + markup)`,
    /// computed as a single integer expression with the division last, so
    /// rounding (toward zero) happens exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::UnknownPricingKey`] for an unconfigured
    /// resource type, routing mode, or tier, and
    /// [`PricingError::InvalidQuantity`] for a negative quantity.
    pub fn estimate(
        &self,
        resource_type: &str,
        quantity: i64,
        mode: RoutingMode,
        tier: &str,
    ) -> Result<i64, PricingError> {
        // BYO bypasses pricing entirely: the caller pays their upstream
        // provider directly. Explicit branch, not a table entry, so it can
        // never be shadowed by configuration.
        if mode == RoutingMode::BringYourOwn {
            return Ok(0);
        }

        if quantity < 0 {
            return Err(PricingError::InvalidQuantity(quantity));
        }

        let rate = self
            .resource_rates
            .get(resource_type)
            .ok_or_else(|| PricingError::UnknownPricingKey {
                kind: "resource_type",
                key: resource_type.to_string(),
            })?;

        let mode_permille = *self.mode_multipliers_permille.get(&mode).ok_or_else(|| {
            PricingError::UnknownPricingKey {
                kind: "routing_mode",
                key: format!("{mode:?}"),
            }
        })?;

        let markup_permille = *self.tier_markups_permille.get(tier).ok_or_else(|| {
            PricingError::UnknownPricingKey {
                kind: "tier",
                key: tier.to_string(),
            }
        })?;

        let numerator = i128::from(quantity)
            * i128::from(rate.rate_milli)
            * i128::from(mode_permille)
            * i128::from(1_000 + markup_permille);
        let denominator = i128::from(rate.unit_size) * 1_000 * 1_000;

        let cost = numerator / denominator;
        let cost = i64::try_from(cost).map_err(|_| PricingError::Overflow)?;

        match rate.floor_milli {
            Some(floor) if cost < floor => Ok(floor),
            _ => Ok(cost),
        }
    }
}

/// Errors from the pricing calculator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    /// A lookup key is missing from the injected tables. Configuration
    /// defect; the request is rejected rather than priced at zero.
    #[error("unknown pricing key: {kind} {key:?}")]
    UnknownPricingKey {
        /// Which table missed.
        kind: &'static str,
        /// The missing key.
        key: String,
    },

    /// Quantity was negative.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The priced amount overflowed i64 milli-credits.
    #[error("pricing overflow")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_output_token_pricing() {
        let config = PricingConfig::default();

        // 1500 credits / 1M output tokens, pro tier (no markup):
        // 10_000 tokens -> 15 credits = 15_000 milli.
        let cost = config
            .estimate("llm_output_tokens", 10_000, RoutingMode::Standard, "pro")
            .unwrap();
        assert_eq!(cost, 15_000);
    }

    #[test]
    fn tier_markup_applies() {
        let config = PricingConfig::default();

        // free tier carries a 20% markup: 15_000 -> 18_000 milli.
        let cost = config
            .estimate("llm_output_tokens", 10_000, RoutingMode::Standard, "free")
            .unwrap();
        assert_eq!(cost, 18_000);
    }

    #[test]
    fn priority_mode_scales_up() {
        let config = PricingConfig::default();

        let standard = config
            .estimate("llm_input_tokens", 1_000_000, RoutingMode::Standard, "pro")
            .unwrap();
        let priority = config
            .estimate("llm_input_tokens", 1_000_000, RoutingMode::Priority, "pro")
            .unwrap();
        assert_eq!(standard, 300_000);
        assert_eq!(priority, 450_000);
    }

    #[test]
    fn zero_quantity_is_free_without_floor() {
        let config = PricingConfig::default();
        let cost = config
            .estimate("api_call", 0, RoutingMode::Standard, "standard")
            .unwrap();
        assert_eq!(cost, 0);
    }

    #[test]
    fn configured_floor_applies_even_at_zero_quantity() {
        let mut config = PricingConfig::default();
        config.resource_rates.insert(
            "session_minute".to_string(),
            ResourceRate {
                unit_size: 1,
                rate_milli: 10,
                floor_milli: Some(500),
            },
        );

        let zero = config
            .estimate("session_minute", 0, RoutingMode::Standard, "pro")
            .unwrap();
        assert_eq!(zero, 500);

        let small = config
            .estimate("session_minute", 3, RoutingMode::Standard, "pro")
            .unwrap();
        assert_eq!(small, 500);

        let large = config
            .estimate("session_minute", 100, RoutingMode::Standard, "pro")
            .unwrap();
        assert_eq!(large, 1_000);
    }

    #[test]
    fn byo_short_circuits_to_zero() {
        let config = PricingConfig::default();

        // Even an unknown resource prices to zero under BYO: the branch is
        // taken before any table lookup.
        let cost = config
            .estimate("nonexistent", 1_000_000, RoutingMode::BringYourOwn, "pro")
            .unwrap();
        assert_eq!(cost, 0);
    }

    #[test]
    fn unknown_resource_fails_closed() {
        let config = PricingConfig::default();
        let err = config
            .estimate("gpu_seconds", 100, RoutingMode::Standard, "pro")
            .unwrap_err();
        assert!(matches!(
            err,
            PricingError::UnknownPricingKey {
                kind: "resource_type",
                ..
            }
        ));
    }

    #[test]
    fn unknown_tier_fails_closed() {
        let config = PricingConfig::default();
        let err = config
            .estimate("api_call", 100, RoutingMode::Standard, "platinum")
            .unwrap_err();
        assert!(matches!(
            err,
            PricingError::UnknownPricingKey { kind: "tier", .. }
        ));
    }

    #[test]
    fn negative_quantity_rejected() {
        let config = PricingConfig::default();
        let err = config
            .estimate("api_call", -1, RoutingMode::Standard, "pro")
            .unwrap_err();
        assert_eq!(err, PricingError::InvalidQuantity(-1));
    }

    #[test]
    fn estimate_is_deterministic() {
        let config = PricingConfig::default();
        let a = config
            .estimate("llm_input_tokens", 123_456, RoutingMode::Economy, "standard")
            .unwrap();
        let b = config
            .estimate("llm_input_tokens", 123_456, RoutingMode::Economy, "standard")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn config_json_roundtrip() {
        let config = PricingConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PricingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed
                .estimate("llm_output_tokens", 10_000, RoutingMode::Standard, "pro")
                .unwrap(),
            15_000
        );
    }
}
