//! Stored analysis results and doctor annotations.
//!
//! The full result payload is kept as JSON in `analyses.results`; the tier is
//! duplicated into `risk_level` so it can be read without decoding.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef};
use rusqlite::{OptionalExtension, Row, ToSql, params};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::cell::CellPercentages;
use crate::recommendations;
use crate::risk::{RiskAssessment, RiskTier};

const ANALYSIS_COLUMNS: &str =
    "id, user_id, created_at, risk_level, results, annotation, annotated_by, annotated_at";

/// Result payload returned by the analyze endpoints and stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    /// Percentage per cell type.
    pub cell_counts: CellPercentages,
    /// "Tier Risk - message" summary.
    pub risk_assessment: String,
    /// Recommendations for the tier.
    pub recommendations: Vec<String>,
    /// Provenance.
    pub details: AnalysisDetails,
}

/// Provenance block of [`AnalysisResults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetails {
    /// When the analysis ran.
    pub analysis_date: DateTime<Utc>,
    /// Dominant-class percentage (mean across images for a batch).
    pub confidence_score: f64,
    /// Images that contributed.
    pub image_count: usize,
}

impl AnalysisResults {
    /// Assembles the payload for a classified percentage map.
    #[must_use]
    pub fn new(
        cell_counts: CellPercentages,
        assessment: &RiskAssessment,
        confidence_score: f64,
        image_count: usize,
        analysis_date: DateTime<Utc>,
    ) -> Self {
        Self {
            cell_counts,
            risk_assessment: assessment.summary(),
            recommendations: recommendations::owned(assessment.tier),
            details: AnalysisDetails {
                analysis_date,
                confidence_score,
                image_count,
            },
        }
    }
}

/// A doctor's note on an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// Free text.
    pub notes: String,
    /// Annotating doctor.
    pub doctor_id: i64,
    /// When the note was written.
    pub annotated_at: DateTime<Utc>,
}

/// One stored analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// Row id.
    pub id: i64,
    /// Patient the analysis belongs to.
    pub user_id: i64,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Tier.
    pub risk_level: RiskTier,
    /// Full payload.
    pub results: AnalysisResults,
    /// Doctor's note, if any.
    pub annotation: Option<Annotation>,
}

impl ToSql for RiskTier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RiskTier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<Analysis> {
    let raw: String = row.get(4)?;
    let results = serde_json::from_str(&raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(error))
    })?;

    let annotation = match (
        row.get::<_, Option<String>>(5)?,
        row.get::<_, Option<i64>>(6)?,
        row.get::<_, Option<DateTime<Utc>>>(7)?,
    ) {
        (Some(notes), Some(doctor_id), Some(annotated_at)) => Some(Annotation {
            notes,
            doctor_id,
            annotated_at,
        }),
        _ => None,
    };

    Ok(Analysis {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: row.get(2)?,
        risk_level: row.get(3)?,
        results,
        annotation,
    })
}

impl Store {
    /// Stores one (batch) analysis for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the insert fails.
    pub fn insert_analysis(
        &self,
        user_id: i64,
        risk_level: RiskTier,
        results: &AnalysisResults,
    ) -> Result<Analysis, StoreError> {
        let payload = serde_json::to_string(results)?;
        let created_at = results.details.analysis_date;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO analyses (user_id, created_at, risk_level, results)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, created_at, risk_level, payload],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(analysis_id = id, user_id, risk_level = %risk_level, "analysis stored");

        Ok(Analysis {
            id,
            user_id,
            created_at,
            risk_level,
            results: results.clone(),
            annotation: None,
        })
    }

    /// Lists a user's analyses, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is corrupt.
    pub fn analyses_for_user(&self, user_id: i64) -> Result<Vec<Analysis>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM analyses
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let analyses = stmt
            .query_map(params![user_id], analysis_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }

    /// Fetches one analysis.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn analysis(&self, id: i64) -> Result<Option<Analysis>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE id = ?1"),
            params![id],
            analysis_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Sets the doctor's note on one of `patient_id`'s analyses, replacing
    /// any earlier note.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the analysis does not exist or
    /// belongs to another patient.
    pub fn annotate_analysis(
        &self,
        patient_id: i64,
        analysis_id: i64,
        doctor_id: i64,
        notes: &str,
    ) -> Result<Analysis, StoreError> {
        let conn = self.lock()?;
        let annotated_at = Utc::now();
        let updated = conn.execute(
            "UPDATE analyses
             SET annotation = ?1, annotated_by = ?2, annotated_at = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![notes, doctor_id, annotated_at, analysis_id, patient_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("analysis", analysis_id));
        }
        tracing::info!(analysis_id, patient_id, doctor_id, "analysis annotated");

        conn.query_row(
            &format!("SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE id = ?1"),
            params![analysis_id],
            analysis_from_row,
        )
        .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::policy::Role;
    use crate::risk;
    use crate::store::test_support::user;

    fn results(myeloblast: f64, at: DateTime<Utc>) -> (RiskTier, AnalysisResults) {
        let rest = (100.0 - myeloblast - 2.0) / 3.0;
        let map = CellPercentages::from_ordered(&[rest, myeloblast, 2.0, rest, rest]).unwrap();
        let assessment = risk::assess(&map).unwrap();
        (
            assessment.tier,
            AnalysisResults::new(map, &assessment, 55.0, 1, at),
        )
    }

    #[test]
    fn test_insert_and_list_newest_first() {
        let store = Store::in_memory().unwrap();
        let patient = user(&store, "pat", Role::Patient);
        let earlier = Utc::now() - Duration::hours(1);

        let (tier, payload) = results(25.0, earlier);
        let first = store.insert_analysis(patient.id, tier, &payload).unwrap();
        let (tier, payload) = results(5.0, Utc::now());
        let second = store.insert_analysis(patient.id, tier, &payload).unwrap();

        let listed = store.analyses_for_user(patient.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(listed[1].created_at, first.created_at);
        assert_eq!(listed[1].risk_level, RiskTier::High);
        assert_eq!(listed[1].results.recommendations.len(), 5);
        assert!(store.analyses_for_user(patient.id + 100).unwrap().is_empty());
    }

    #[test]
    fn test_payload_shape() {
        let (_, payload) = results(25.0, Utc::now());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["cell_counts"]["myeloblast"], 25.0);
        assert_eq!(
            json["risk_assessment"],
            "High Risk - Immediate medical attention required"
        );
        assert_eq!(json["details"]["image_count"], 1);
    }

    #[test]
    fn test_unknown_user_violates_foreign_key() {
        let store = Store::in_memory().unwrap();
        let (tier, payload) = results(5.0, Utc::now());
        assert!(matches!(
            store.insert_analysis(77, tier, &payload),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn test_annotate_checks_ownership() {
        let store = Store::in_memory().unwrap();
        let doctor = user(&store, "doc", Role::Doctor);
        let patient = user(&store, "pat", Role::Patient);
        let other = user(&store, "other", Role::Patient);
        let (tier, payload) = results(15.0, Utc::now());
        let stored = store.insert_analysis(patient.id, tier, &payload).unwrap();

        let annotated = store
            .annotate_analysis(patient.id, stored.id, doctor.id, "repeat CBC in a week")
            .unwrap();
        let note = annotated.annotation.unwrap();
        assert_eq!(note.notes, "repeat CBC in a week");
        assert_eq!(note.doctor_id, doctor.id);
        assert_eq!(annotated.results.recommendations, stored.results.recommendations);

        assert!(matches!(
            store.annotate_analysis(other.id, stored.id, doctor.id, "x"),
            Err(StoreError::NotFound { entity: "analysis", .. })
        ));
        assert!(matches!(
            store.annotate_analysis(patient.id, 999, doctor.id, "x"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.analysis(stored.id).unwrap().unwrap().annotation.is_some());
    }
}
