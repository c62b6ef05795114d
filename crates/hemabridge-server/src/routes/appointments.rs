//! Appointment booking and status updates.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use hemabridge_core::policy::Action;
use hemabridge_core::store::{Appointment, AppointmentStatus, NewAppointment};
use serde::Deserialize;

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::AppState;

/// Accepts RFC 3339, a `datetime-local` value (`2026-11-03T14:30`, read as
/// UTC) or a bare date (midnight UTC).
fn parse_when(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(at.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    doctor_id: i64,
    date: String,
    #[serde(default)]
    notes: Option<String>,
}

pub async fn book(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<BookRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    user.require(Action::BookAppointment)?;
    let Json(request) = payload?;
    let scheduled_at = parse_when(&request.date)
        .ok_or_else(|| ApiError::bad_request(format!("unrecognized date: {}", request.date)))?;

    let new_appointment = NewAppointment {
        patient_id: user.id(),
        doctor_id: request.doctor_id,
        scheduled_at,
        notes: request
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty()),
    };
    let appointment = state
        .db(move |store| store.create_appointment(&new_appointment))
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    user.require(Action::ListAppointments)?;
    let (user_id, role) = (user.id(), user.0.role);
    Ok(Json(
        state
            .db(move |store| store.appointments_for(user_id, role))
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    status: String,
}

/// Only the doctor the appointment was booked with may change its status.
pub async fn update_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Appointment>, ApiError> {
    let Json(request) = payload?;
    let status = request
        .status
        .parse::<AppointmentStatus>()
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    let appointment = state
        .db(move |store| store.appointment(id))
        .await?
        .ok_or(ApiError::NotFound {
            entity: "appointment",
            id,
        })?;
    user.require(Action::UpdateAppointmentStatus {
        assigned: appointment.doctor_id == user.id(),
    })?;

    Ok(Json(
        state
            .db(move |store| store.update_appointment_status(id, status))
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_parse_when_formats() {
        let at = parse_when("2026-11-03T14:30").unwrap();
        assert_eq!((at.month(), at.day(), at.hour(), at.minute()), (11, 3, 14, 30));

        let at = parse_when("2026-11-03T14:30:00+02:00").unwrap();
        assert_eq!(at.hour(), 12);

        let at = parse_when(" 2026-11-03 ").unwrap();
        assert_eq!((at.day(), at.hour()), (3, 0));

        assert!(parse_when("next tuesday").is_none());
        assert!(parse_when("").is_none());
    }
}
