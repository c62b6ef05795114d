//! Risk classification from cell-type percentages.
//!
//! One threshold rule serves both the single-image and the batch path:
//!
//! | Tier | Condition |
//! |------|-----------|
//! | `High` | myeloblast > 20 or erythroblast > 10 |
//! | `Moderate` | myeloblast > 10 or erythroblast > 5 |
//! | `Low` | otherwise |
//!
//! Comparisons are strict, so a value sitting exactly on a threshold belongs
//! to the lower tier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell::{CellPercentages, CellType};

/// Myeloblast percentage above which the tier is `High`.
pub const MYELOBLAST_HIGH: f64 = 20.0;
/// Myeloblast percentage above which the tier is at least `Moderate`.
pub const MYELOBLAST_MODERATE: f64 = 10.0;
/// Erythroblast percentage above which the tier is `High`.
pub const ERYTHROBLAST_HIGH: f64 = 10.0;
/// Erythroblast percentage above which the tier is at least `Moderate`.
pub const ERYTHROBLAST_MODERATE: f64 = 5.0;

/// Errors from risk classification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// The percentage map cannot be classified.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected.
        reason: String,
    },
}

impl RiskError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Ordinal risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    /// Regular monitoring.
    Low,
    /// Further evaluation.
    Moderate,
    /// Immediate attention.
    High,
}

impl RiskTier {
    /// All tiers in ascending order.
    pub const ALL: [Self; 3] = [Self::Low, Self::Moderate, Self::High];

    /// Display label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
        }
    }

    /// Patient-facing message attached to the tier.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Low => "Regular monitoring advised",
            Self::Moderate => "Further evaluation recommended",
            Self::High => "Immediate medical attention required",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RiskError::invalid(format!("unknown risk tier '{s}'")))
    }
}

/// Result of classifying one percentage map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    /// The tier.
    pub tier: RiskTier,
    /// Human-readable message for the tier.
    pub message: &'static str,
}

impl RiskAssessment {
    /// Renders "High Risk - Immediate medical attention required".
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} Risk - {}", self.tier, self.message)
    }
}

impl From<RiskTier> for RiskAssessment {
    fn from(tier: RiskTier) -> Self {
        Self {
            tier,
            message: tier.message(),
        }
    }
}

fn required(percentages: &CellPercentages, cell: CellType) -> Result<f64, RiskError> {
    let value = percentages
        .get(cell)
        .ok_or_else(|| RiskError::invalid(format!("missing required label '{cell}'")))?;
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(RiskError::invalid(format!(
            "{cell} percentage {value} is outside [0, 100]"
        )));
    }
    Ok(value)
}

/// Classifies a percentage map.
///
/// # Errors
///
/// Returns [`RiskError::InvalidInput`] if `myeloblast` or `erythroblast` is
/// missing, or either value is not a finite percentage.
pub fn assess(percentages: &CellPercentages) -> Result<RiskAssessment, RiskError> {
    let myeloblast = required(percentages, CellType::Myeloblast)?;
    let erythroblast = required(percentages, CellType::Erythroblast)?;

    let tier = if myeloblast > MYELOBLAST_HIGH || erythroblast > ERYTHROBLAST_HIGH {
        RiskTier::High
    } else if myeloblast > MYELOBLAST_MODERATE || erythroblast > ERYTHROBLAST_MODERATE {
        RiskTier::Moderate
    } else {
        RiskTier::Low
    };

    Ok(tier.into())
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn arb_map(
        myeloblast: impl Strategy<Value = f64>,
        erythroblast: impl Strategy<Value = f64>,
    ) -> impl Strategy<Value = CellPercentages> {
        (myeloblast, erythroblast).prop_map(|(m, e)| {
            CellPercentages::new()
                .with(CellType::Myeloblast, m)
                .with(CellType::Erythroblast, e)
        })
    }

    proptest! {
        #[test]
        fn low_when_both_signals_quiet(p in arb_map(0.0..=10.0f64, 0.0..=5.0f64)) {
            prop_assert_eq!(assess(&p).unwrap().tier, RiskTier::Low);
        }

        #[test]
        fn moderate_band_for_myeloblast(p in arb_map(10.0001..=20.0f64, 0.0..=5.0f64)) {
            prop_assert_eq!(assess(&p).unwrap().tier, RiskTier::Moderate);
        }

        #[test]
        fn high_above_twenty(p in arb_map(20.0001..=100.0f64, 0.0..=100.0f64)) {
            prop_assert_eq!(assess(&p).unwrap().tier, RiskTier::High);
        }

        #[test]
        fn tier_is_monotonic_in_myeloblast(
            a in 0.0..=100.0f64,
            b in 0.0..=100.0f64,
            e in 0.0..=100.0f64,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let lo_tier = assess(&CellPercentages::new()
                .with(CellType::Myeloblast, lo)
                .with(CellType::Erythroblast, e)).unwrap().tier;
            let hi_tier = assess(&CellPercentages::new()
                .with(CellType::Myeloblast, hi)
                .with(CellType::Erythroblast, e)).unwrap().tier;
            prop_assert!(lo_tier <= hi_tier);
        }
    }
}
