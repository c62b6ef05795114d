//! Static recommendation lists keyed by risk tier.

use crate::risk::RiskTier;

/// Returned for a tier label that is not recognized.
pub const DEFAULT_RECOMMENDATIONS: &[&str] = &["Consult with healthcare provider"];

const HIGH: &[&str] = &[
    "Schedule immediate hematologist consultation",
    "Complete blood count (CBC) test recommended",
    "Bone marrow biopsy may be necessary",
    "Follow-up within 24-48 hours",
    "Monitor for fever, fatigue, and unusual bleeding",
];

const MODERATE: &[&str] = &[
    "Schedule follow-up within one week",
    "Regular blood count monitoring",
    "Track any new symptoms",
    "Additional testing may be needed",
    "Maintain detailed symptom diary",
];

const LOW: &[&str] = &[
    "Continue regular check-ups as scheduled",
    "Monitor for any changes in symptoms",
    "Maintain regular blood test schedule",
    "Follow healthy lifestyle recommendations",
    "Report any new symptoms to healthcare provider",
];

/// Returns the ordered recommendations for `tier`.
#[must_use]
pub const fn for_tier(tier: RiskTier) -> &'static [&'static str] {
    match tier {
        RiskTier::High => HIGH,
        RiskTier::Moderate => MODERATE,
        RiskTier::Low => LOW,
    }
}

/// Looks up recommendations by tier label.
///
/// Unrecognized labels yield [`DEFAULT_RECOMMENDATIONS`].
#[must_use]
pub fn for_label(label: &str) -> &'static [&'static str] {
    label
        .parse::<RiskTier>()
        .map_or(DEFAULT_RECOMMENDATIONS, for_tier)
}

/// Owned copy of [`for_tier`], for response and storage payloads.
#[must_use]
pub fn owned(tier: RiskTier) -> Vec<String> {
    for_tier(tier).iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tier_has_five_entries() {
        for tier in RiskTier::ALL {
            assert_eq!(for_tier(tier).len(), 5, "tier {tier}");
        }
    }

    #[test]
    fn test_label_lookup_matches_typed_lookup() {
        assert_eq!(for_label("High"), for_tier(RiskTier::High));
        assert_eq!(for_label("moderate"), for_tier(RiskTier::Moderate));
        assert_eq!(for_label("Low")[0], "Continue regular check-ups as scheduled");
    }

    #[test]
    fn test_unknown_label_yields_default() {
        assert_eq!(for_label("Critical"), DEFAULT_RECOMMENDATIONS);
        assert_eq!(for_label(""), DEFAULT_RECOMMENDATIONS);
        assert_eq!(for_label("Critical").len(), 1);
    }
}
