//! Batch aggregation of per-image percentage maps.
//!
//! A multi-image submission yields one verdict: the per-label arithmetic mean
//! across images, classified once by [`crate::risk::assess`].

#![allow(clippy::cast_precision_loss)] // image counts are far below 2^52

use crate::cell::CellPercentages;
use crate::risk::{self, RiskAssessment, RiskError};

/// One verdict for a batch of images.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchVerdict {
    /// Mean percentage per label.
    pub percentages: CellPercentages,
    /// Classification of the averaged map.
    pub assessment: RiskAssessment,
    /// Number of images that contributed.
    pub image_count: usize,
}

/// Averages `maps` label by label.
///
/// # Errors
///
/// Returns [`RiskError::InvalidInput`] when `maps` is empty or the maps do
/// not all carry the same labels.
pub fn average(maps: &[CellPercentages]) -> Result<CellPercentages, RiskError> {
    let Some(first) = maps.first() else {
        return Err(RiskError::invalid("batch contains no images"));
    };

    let count = maps.len() as f64;
    let mut averaged = CellPercentages::new();

    for cell in first.labels() {
        let mut sum = 0.0;
        for (index, map) in maps.iter().enumerate() {
            let value = map.get(cell).ok_or_else(|| {
                RiskError::invalid(format!("image {index} is missing label '{cell}'"))
            })?;
            sum += value;
        }
        averaged.insert(cell, sum / count);
    }

    if let Some((index, _)) = maps
        .iter()
        .enumerate()
        .find(|(_, map)| map.len() != first.len())
    {
        return Err(RiskError::invalid(format!(
            "image {index} carries a different label set than image 0"
        )));
    }

    Ok(averaged)
}

/// Averages `maps` and classifies the result.
///
/// # Errors
///
/// Propagates [`average`] and [`risk::assess`] errors.
pub fn assess_batch(maps: &[CellPercentages]) -> Result<BatchVerdict, RiskError> {
    let percentages = average(maps)?;
    let assessment = risk::assess(&percentages)?;
    Ok(BatchVerdict {
        percentages,
        assessment,
        image_count: maps.len(),
    })
}

/// Arithmetic mean of `values`, or `None` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellType;
    use crate::risk::RiskTier;

    fn image(myeloblast: f64, erythroblast: f64) -> CellPercentages {
        let rest = (100.0 - myeloblast - erythroblast) / 3.0;
        CellPercentages::from_ordered(&[rest, myeloblast, erythroblast, rest, rest]).unwrap()
    }

    #[test]
    fn test_empty_batch_is_invalid_input() {
        let err = assess_batch(&[]).unwrap_err();
        assert!(matches!(err, RiskError::InvalidInput { .. }));
    }

    #[test]
    fn test_single_image_matches_single_path() {
        let one = image(25.0, 2.0);
        let verdict = assess_batch(std::slice::from_ref(&one)).unwrap();
        assert_eq!(verdict.percentages, one);
        assert_eq!(verdict.assessment, risk::assess(&one).unwrap());
        assert_eq!(verdict.image_count, 1);
    }

    #[test]
    fn test_thirty_and_ten_average_to_moderate() {
        let verdict = assess_batch(&[image(30.0, 1.0), image(10.0, 1.0)]).unwrap();
        assert_eq!(verdict.percentages.get(CellType::Myeloblast), Some(20.0));
        assert_eq!(verdict.assessment.tier, RiskTier::Moderate);
        assert_eq!(verdict.image_count, 2);
    }

    #[test]
    fn test_erythroblast_average_escalates() {
        let verdict = assess_batch(&[image(1.0, 14.0), image(1.0, 8.0)]).unwrap();
        assert_eq!(verdict.percentages.get(CellType::Erythroblast), Some(11.0));
        assert_eq!(verdict.assessment.tier, RiskTier::High);
    }

    #[test]
    fn test_mismatched_labels_are_rejected() {
        let partial = CellPercentages::new()
            .with(CellType::Myeloblast, 10.0)
            .with(CellType::Erythroblast, 1.0);
        assert!(average(&[image(10.0, 1.0), partial.clone()]).is_err());
        assert!(average(&[partial, image(10.0, 1.0)]).is_err());
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[40.0, 60.0]), Some(50.0));
    }
}
