//! Cell-type vocabulary and percentage maps.
//!
//! The classifier distinguishes five blood-cell categories. Its output order
//! is fixed and matches [`CellType::ALL`]; anything that turns a probability
//! vector into a [`CellPercentages`] map relies on that order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the five cell categories the classifier reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    /// Monocyte.
    Monocyte,
    /// Myeloblast (immature white cell, primary triage signal).
    Myeloblast,
    /// Erythroblast (red-cell precursor, secondary triage signal).
    Erythroblast,
    /// Segmented neutrophil.
    SegmentedNeutrophil,
    /// Basophil.
    Basophil,
}

impl CellType {
    /// All labels in classifier output order.
    pub const ALL: [Self; 5] = [
        Self::Monocyte,
        Self::Myeloblast,
        Self::Erythroblast,
        Self::SegmentedNeutrophil,
        Self::Basophil,
    ];

    /// Returns the wire label (`snake_case`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monocyte => "monocyte",
            Self::Myeloblast => "myeloblast",
            Self::Erythroblast => "erythroblast",
            Self::SegmentedNeutrophil => "segmented_neutrophil",
            Self::Basophil => "basophil",
        }
    }

    /// Returns the label formatted for documents ("Segmented Neutrophil").
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Monocyte => "Monocyte",
            Self::Myeloblast => "Myeloblast",
            Self::Erythroblast => "Erythroblast",
            Self::SegmentedNeutrophil => "Segmented Neutrophil",
            Self::Basophil => "Basophil",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the five labels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cell type: {0}")]
pub struct UnknownCellType(pub String);

impl FromStr for CellType {
    type Err = UnknownCellType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|cell| cell.as_str() == s)
            .ok_or_else(|| UnknownCellType(s.to_string()))
    }
}

/// Mapping from cell type to a percentage in `[0, 100]`.
///
/// A map produced by the model handler always carries all five labels. Maps
/// built by hand (tests, stored JSON from older records) may not, which is
/// why lookups return `Option`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellPercentages(BTreeMap<CellType, f64>);

impl CellPercentages {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builds a map from percentages given in classifier output order.
    ///
    /// Returns `None` when `values` does not have exactly five entries.
    #[must_use]
    pub fn from_ordered(values: &[f64]) -> Option<Self> {
        if values.len() != CellType::ALL.len() {
            return None;
        }
        Some(Self(
            CellType::ALL.into_iter().zip(values.iter().copied()).collect(),
        ))
    }

    /// Sets the percentage for `cell`, returning the previous value.
    pub fn insert(&mut self, cell: CellType, percent: f64) -> Option<f64> {
        self.0.insert(cell, percent)
    }

    /// Builder-style [`Self::insert`].
    #[must_use]
    pub fn with(mut self, cell: CellType, percent: f64) -> Self {
        self.0.insert(cell, percent);
        self
    }

    /// Returns the percentage for `cell`, if present.
    #[must_use]
    pub fn get(&self, cell: CellType) -> Option<f64> {
        self.0.get(&cell).copied()
    }

    /// Iterates over `(cell, percent)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (CellType, f64)> + '_ {
        self.0.iter().map(|(cell, pct)| (*cell, *pct))
    }

    /// Iterates over the labels present in this map.
    pub fn labels(&self) -> impl Iterator<Item = CellType> + '_ {
        self.0.keys().copied()
    }

    /// Number of labels present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the label with the highest percentage.
    #[must_use]
    pub fn dominant(&self) -> Option<(CellType, f64)> {
        self.iter().max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl FromIterator<(CellType, f64)> for CellPercentages {
    fn from_iter<I: IntoIterator<Item = (CellType, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_from_str() {
        for cell in CellType::ALL {
            assert_eq!(cell.as_str().parse::<CellType>(), Ok(cell));
        }
        assert!("lymphocyte".parse::<CellType>().is_err());
    }

    #[test]
    fn test_from_ordered_follows_classifier_order() {
        let map = CellPercentages::from_ordered(&[10.0, 20.0, 30.0, 25.0, 15.0]).unwrap();
        assert_eq!(map.get(CellType::Monocyte), Some(10.0));
        assert_eq!(map.get(CellType::Myeloblast), Some(20.0));
        assert_eq!(map.get(CellType::Erythroblast), Some(30.0));
        assert_eq!(map.get(CellType::SegmentedNeutrophil), Some(25.0));
        assert_eq!(map.get(CellType::Basophil), Some(15.0));

        assert!(CellPercentages::from_ordered(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_serializes_as_label_keyed_object() {
        let map = CellPercentages::new()
            .with(CellType::Myeloblast, 25.0)
            .with(CellType::SegmentedNeutrophil, 75.0);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["myeloblast"], 25.0);
        assert_eq!(json["segmented_neutrophil"], 75.0);

        let back: CellPercentages = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_dominant_picks_largest() {
        let map = CellPercentages::from_ordered(&[5.0, 60.0, 10.0, 20.0, 5.0]).unwrap();
        assert_eq!(map.dominant(), Some((CellType::Myeloblast, 60.0)));
        assert_eq!(CellPercentages::new().dominant(), None);
    }
}
