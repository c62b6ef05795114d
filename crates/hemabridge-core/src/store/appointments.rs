//! Appointments between a patient and a doctor.
//!
//! Status changes are unconstrained: any status may follow any other.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Store, StoreError};
use crate::policy::Role;

const APPOINTMENT_SELECT: &str = "SELECT a.id, a.patient_id, p.username, a.doctor_id, d.username,
        a.scheduled_at, a.status, a.notes, a.created_at
    FROM appointments a
    JOIN users p ON p.id = a.patient_id
    JOIN users d ON d.id = a.doctor_id";

/// Appointment lifecycle label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Booked, not yet held.
    Scheduled,
    /// Held.
    Completed,
    /// Called off.
    Cancelled,
}

impl AppointmentStatus {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized status label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown appointment status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

impl ToSql for AppointmentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AppointmentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

/// Booking input.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    /// Booking patient.
    pub patient_id: i64,
    /// Requested doctor.
    pub doctor_id: i64,
    /// Appointment time.
    pub scheduled_at: DateTime<Utc>,
    /// Optional free text.
    pub notes: Option<String>,
}

/// A stored appointment with both parties' usernames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Appointment {
    /// Row id.
    pub id: i64,
    /// Patient id.
    pub patient_id: i64,
    /// Patient username.
    pub patient_name: String,
    /// Doctor id.
    pub doctor_id: i64,
    /// Doctor username.
    pub doctor_name: String,
    /// Appointment time.
    pub scheduled_at: DateTime<Utc>,
    /// Current status.
    pub status: AppointmentStatus,
    /// Optional free text.
    pub notes: Option<String>,
    /// Booking time.
    pub created_at: DateTime<Utc>,
}

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        doctor_id: row.get(3)?,
        doctor_name: row.get(4)?,
        scheduled_at: row.get(5)?,
        status: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn require_role(
    conn: &Connection,
    id: i64,
    role: Role,
    entity: &'static str,
) -> Result<(), StoreError> {
    let actual: Option<Role> = conn
        .query_row("SELECT role FROM users WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    match actual {
        Some(found) if found == role => Ok(()),
        _ => Err(StoreError::not_found(entity, id)),
    }
}

fn fetch(conn: &Connection, id: i64) -> Result<Option<Appointment>, StoreError> {
    conn.query_row(
        &format!("{APPOINTMENT_SELECT} WHERE a.id = ?1"),
        params![id],
        appointment_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

impl Store {
    /// Books an appointment in status `scheduled`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when `doctor_id` is not a doctor or
    /// `patient_id` is not a patient.
    pub fn create_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let conn = self.lock()?;
        require_role(&conn, new.patient_id, Role::Patient, "patient")?;
        require_role(&conn, new.doctor_id, Role::Doctor, "doctor")?;

        conn.execute(
            "INSERT INTO appointments (patient_id, doctor_id, scheduled_at, status, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.patient_id,
                new.doctor_id,
                new.scheduled_at,
                AppointmentStatus::Scheduled,
                new.notes,
                Utc::now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(
            appointment_id = id,
            patient_id = new.patient_id,
            doctor_id = new.doctor_id,
            "appointment booked"
        );

        fetch(&conn, id)?.ok_or_else(|| StoreError::not_found("appointment", id))
    }

    /// Lists appointments where `user_id` is the patient (for patients) or
    /// the doctor (for doctors), soonest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn appointments_for(
        &self,
        user_id: i64,
        role: Role,
    ) -> Result<Vec<Appointment>, StoreError> {
        let column = match role {
            Role::Patient => "a.patient_id",
            Role::Doctor => "a.doctor_id",
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{APPOINTMENT_SELECT} WHERE {column} = ?1 ORDER BY a.scheduled_at ASC, a.id ASC"
        ))?;
        let appointments = stmt
            .query_map(params![user_id], appointment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(appointments)
    }

    /// Fetches one appointment.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let conn = self.lock()?;
        fetch(&conn, id)
    }

    /// Sets an appointment's status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub fn update_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE appointments SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("appointment", id));
        }
        tracing::info!(appointment_id = id, status = %status, "appointment status changed");
        fetch(&conn, id)?.ok_or_else(|| StoreError::not_found("appointment", id))
    }
}
