//! Patient directory, history, reports and doctor notes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use hemabridge_core::policy::{Action, Role};
use hemabridge_core::report::{self, PatientInfo};
use hemabridge_core::risk::RiskTier;
use hemabridge_core::store::{Analysis, StoreError, User, UserProfile};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::{AppState, blocking};

/// Loads `id` and checks it is a patient account.
async fn patient(state: &AppState, id: i64) -> Result<User, ApiError> {
    state
        .db(move |store| store.user_by_id(id))
        .await?
        .filter(|user| user.role == Role::Patient)
        .ok_or(ApiError::NotFound {
            entity: "patient",
            id,
        })
}

#[derive(Debug, Serialize)]
pub struct PatientSummary {
    #[serde(flatten)]
    profile: UserProfile,
    analysis_count: usize,
    latest_risk_level: Option<RiskTier>,
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<PatientSummary>>, ApiError> {
    user.require(Action::ListPatients)?;
    let summaries = state
        .db(|store| {
            store
                .users_by_role(Role::Patient)?
                .into_iter()
                .map(|patient| {
                    let analyses = store.analyses_for_user(patient.id)?;
                    Ok(PatientSummary {
                        profile: UserProfile::from(&patient),
                        analysis_count: analyses.len(),
                        latest_risk_level: analyses.first().map(|a| a.risk_level),
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })
        .await?;
    Ok(Json(summaries))
}

#[derive(Debug, Serialize)]
pub struct PatientHistory {
    patient: UserProfile,
    analyses: Vec<Analysis>,
}

pub async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<PatientHistory>, ApiError> {
    user.require(Action::ViewPatientHistory {
        own: id == user.id(),
    })?;
    let patient = patient(&state, id).await?;
    let analyses = state.db(move |store| store.analyses_for_user(id)).await?;
    Ok(Json(PatientHistory {
        patient: UserProfile::from(&patient),
        analyses,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReportQuery {
    summary: bool,
}

pub async fn report(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    user.require(Action::GeneratePatientReport {
        own: id == user.id(),
    })?;
    let patient = patient(&state, id).await?;
    let analyses = state.db(move |store| store.analyses_for_user(id)).await?;
    let info = PatientInfo {
        id: patient.id,
        name: patient.username,
        email: patient.email,
    };

    let summary = query.summary;
    let kind = if summary { "summary" } else { "report" };
    let count = analyses.len();
    let pdf = blocking(move || {
        if summary {
            report::render_summary(&info, &analyses)
        } else {
            report::render_detailed(&info, &analyses)
        }
    })
    .await?;
    info!(
        patient_id = id,
        requested_by = user.id(),
        kind,
        analyses = count,
        bytes = pdf.len(),
        "report generated"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"patient_{id}_{kind}.pdf\""),
            ),
        ],
        pdf,
    ))
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    analysis_id: i64,
    notes: String,
}

pub async fn add_note(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    payload: Result<Json<NoteRequest>, JsonRejection>,
) -> Result<Json<Analysis>, ApiError> {
    user.require(Action::AnnotateAnalysis)?;
    let Json(request) = payload?;
    let notes = request.notes.trim();
    if notes.is_empty() {
        return Err(ApiError::bad_request("notes must not be empty"));
    }

    patient(&state, id).await?;
    let (analysis_id, doctor_id, notes) = (request.analysis_id, user.id(), notes.to_string());
    let annotated = state
        .db(move |store| store.annotate_analysis(id, analysis_id, doctor_id, &notes))
        .await?;
    Ok(Json(annotated))
}
