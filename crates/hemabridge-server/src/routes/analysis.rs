//! Image analysis and the caller's own results.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::multipart::{Multipart, MultipartRejection};
use chrono::Utc;
use hemabridge_core::aggregate;
use hemabridge_core::policy::Action;
use hemabridge_core::risk::RiskTier;
use hemabridge_core::store::{Analysis, AnalysisResults};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    analysis_id: i64,
    risk_level: RiskTier,
    results: AnalysisResults,
}

/// Collects every part named `field`, in upload order.
async fn uploads(
    multipart: Result<Multipart, MultipartRejection>,
    field: &str,
) -> Result<Vec<Bytes>, ApiError> {
    let mut multipart = multipart?;
    let mut files = Vec::new();
    while let Some(part) = multipart.next_field().await? {
        if part.name() == Some(field) {
            files.push(part.bytes().await?);
        }
    }
    Ok(files)
}

/// Classifies `images` one after another, averages them into one verdict
/// and stores it. Any failing image aborts the whole batch before anything
/// is written.
async fn run(
    state: &AppState,
    user: &CurrentUser,
    images: &[Bytes],
) -> Result<AnalysisResponse, ApiError> {
    let mut maps = Vec::with_capacity(images.len());
    let mut confidences = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let inference = state.model.infer(image).await.inspect_err(|error| {
            warn!(user_id = user.id(), index, error = %error, "image rejected");
        })?;
        maps.push(inference.percentages);
        confidences.push(inference.confidence);
    }

    let verdict = aggregate::assess_batch(&maps)?;
    let results = AnalysisResults::new(
        verdict.percentages,
        &verdict.assessment,
        aggregate::mean(&confidences).unwrap_or_default(),
        verdict.image_count,
        Utc::now(),
    );
    let (user_id, tier) = (user.id(), verdict.assessment.tier);
    let stored = state
        .db(move |store| store.insert_analysis(user_id, tier, &results))
        .await?;
    info!(
        user_id = user.id(),
        analysis_id = stored.id,
        images = verdict.image_count,
        risk_level = %stored.risk_level,
        "analysis complete"
    );

    Ok(AnalysisResponse {
        analysis_id: stored.id,
        risk_level: stored.risk_level,
        results: stored.results,
    })
}

pub async fn analyze(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    user.require(Action::AnalyzeImages)?;
    let files = uploads(multipart, "file").await?;
    if files.len() != 1 {
        return Err(ApiError::bad_request(
            "expected exactly one image in the 'file' field",
        ));
    }
    Ok(Json(run(&state, &user, &files).await?))
}

pub async fn analyze_batch(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    user.require(Action::AnalyzeImages)?;
    let files = uploads(multipart, "files").await?;
    Ok(Json(run(&state, &user, &files).await?))
}

pub async fn reports(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<Analysis>>, ApiError> {
    user.require(Action::ViewOwnReports)?;
    let user_id = user.id();
    Ok(Json(
        state
            .db(move |store| store.analyses_for_user(user_id))
            .await?,
    ))
}
