//! Plan catalog: what each subscription tier is entitled to.
//!
//! The limits here are the single source of truth for the rate limiter, the
//! quota ledger, and the request-option gate. Billing only ever names a
//! tier; everything the admission pipeline enforces is derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription tiers, ordered by what they unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Pro,
    Business,
}

/// Admission-relevant entitlements for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Sliding-window request ceiling per minute.
    pub per_minute: u32,
    /// Monthly admission quota.
    pub monthly: i64,
    /// Whether requests may ask for region detection.
    pub region_detection: bool,
}

impl PlanTier {
    pub fn limits(&self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                per_minute: 10,
                monthly: 50,
                region_detection: false,
            },
            PlanTier::Basic => PlanLimits {
                per_minute: 30,
                monthly: 1_000,
                region_detection: false,
            },
            PlanTier::Pro => PlanLimits {
                per_minute: 100,
                monthly: 10_000,
                region_detection: true,
            },
            PlanTier::Business => PlanLimits {
                per_minute: 500,
                monthly: 100_000,
                region_detection: true,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Pro => "pro",
            PlanTier::Business => "business",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan tier: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for PlanTier {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "basic" => Ok(PlanTier::Basic),
            "pro" => Ok(PlanTier::Pro),
            "business" => Ok(PlanTier::Business),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_grow_with_tier() {
        let free = PlanTier::Free.limits();
        let business = PlanTier::Business.limits();
        assert!(free.per_minute < business.per_minute);
        assert!(free.monthly < business.monthly);
        assert!(!free.region_detection);
        assert!(business.region_detection);
    }

    #[test]
    fn tier_parses_from_its_display_form() {
        for tier in [
            PlanTier::Free,
            PlanTier::Basic,
            PlanTier::Pro,
            PlanTier::Business,
        ] {
            assert_eq!(tier.as_str().parse::<PlanTier>(), Ok(tier));
        }
        assert!("enterprise".parse::<PlanTier>().is_err());
    }
}
