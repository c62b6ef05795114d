//! Role-based authorization.
//!
//! Every endpoint describes what it is about to do as an [`Action`] and asks
//! [`decide`] whether the caller's [`Role`] may do it. Role checks live here
//! and nowhere else.
//!
//! Default is deny: an action not listed for a role is refused.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account role, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Clinician: reads patients, annotates analyses, manages appointments.
    Doctor,
    /// Patient: submits images, books appointments.
    Patient,
}

impl Role {
    /// Lowercase label as stored and serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a role label other than `doctor` or `patient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Ok(Self::Doctor),
            "patient" => Ok(Self::Patient),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Something a caller wants to do.
///
/// Actions that touch one patient's data carry `own`, which is true when the
/// caller is that patient. Appointment updates carry `assigned`, true when
/// the caller is the doctor the appointment was booked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit one or more images for analysis.
    AnalyzeImages,
    /// List the caller's own analyses.
    ViewOwnReports,
    /// Read a patient's analysis history.
    ViewPatientHistory {
        /// Caller is the patient.
        own: bool,
    },
    /// Download a patient's PDF report.
    GeneratePatientReport {
        /// Caller is the patient.
        own: bool,
    },
    /// List all patients.
    ListPatients,
    /// List all doctors.
    ListDoctors,
    /// Attach a note to an analysis.
    AnnotateAnalysis,
    /// Talk to the assistant.
    Chat,
    /// Book an appointment with a doctor.
    BookAppointment,
    /// List the caller's appointments.
    ListAppointments,
    /// Change an appointment's status.
    UpdateAppointmentStatus {
        /// Caller is the appointment's doctor.
        assigned: bool,
    },
}

impl Action {
    /// Stable name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AnalyzeImages => "analyze_images",
            Self::ViewOwnReports => "view_own_reports",
            Self::ViewPatientHistory { .. } => "view_patient_history",
            Self::GeneratePatientReport { .. } => "generate_patient_report",
            Self::ListPatients => "list_patients",
            Self::ListDoctors => "list_doctors",
            Self::AnnotateAnalysis => "annotate_analysis",
            Self::Chat => "chat",
            Self::BookAppointment => "book_appointment",
            Self::ListAppointments => "list_appointments",
            Self::UpdateAppointmentStatus { assigned: true } => "update_appointment_status",
            Self::UpdateAppointmentStatus { assigned: false } => {
                "update_unassigned_appointment_status"
            },
        }
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action may proceed.
    Allow,
    /// The action is refused.
    Deny {
        /// Caller's role.
        role: Role,
        /// Refused action name.
        action: &'static str,
    },
}

/// Raised by [`require`] on deny.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The role may not perform the action.
    #[error("{role} may not {action}")]
    Forbidden {
        /// Caller's role.
        role: Role,
        /// Refused action name.
        action: &'static str,
    },
}

impl Decision {
    /// Whether the decision is [`Decision::Allow`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Converts a deny into an error.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Forbidden`] for [`Decision::Deny`].
    pub fn require(self) -> Result<(), PolicyError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny { role, action } => {
                tracing::debug!(role = %role, action, "policy denied");
                Err(PolicyError::Forbidden { role, action })
            },
        }
    }
}

/// Decides whether `role` may perform `action`.
#[must_use]
pub const fn decide(role: Role, action: Action) -> Decision {
    let allowed = match (role, action) {
        (
            Role::Doctor,
            Action::ViewPatientHistory { .. }
            | Action::GeneratePatientReport { .. }
            | Action::ListPatients
            | Action::AnnotateAnalysis,
        ) => true,
        (Role::Doctor, Action::UpdateAppointmentStatus { assigned }) => assigned,
        (
            Role::Patient,
            Action::ViewPatientHistory { own } | Action::GeneratePatientReport { own },
        ) => own,
        (Role::Patient, Action::BookAppointment) => true,
        (
            _,
            Action::AnalyzeImages
            | Action::ViewOwnReports
            | Action::ListDoctors
            | Action::Chat
            | Action::ListAppointments,
        ) => true,
        _ => false,
    };
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny {
            role,
            action: action.name(),
        }
    }
}

/// Decides and converts a deny into an error.
///
/// # Errors
///
/// Returns [`PolicyError::Forbidden`] when [`decide`] denies.
pub fn require(role: Role, action: Action) -> Result<(), PolicyError> {
    decide(role, action).require()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVERYONE: [Action; 5] = [
        Action::AnalyzeImages,
        Action::ViewOwnReports,
        Action::ListDoctors,
        Action::Chat,
        Action::ListAppointments,
    ];

    #[test]
    fn test_shared_actions_allowed_for_both_roles() {
        for action in EVERYONE {
            assert_eq!(decide(Role::Doctor, action), Decision::Allow, "{action:?}");
            assert_eq!(decide(Role::Patient, action), Decision::Allow, "{action:?}");
        }
    }

    #[test]
    fn test_doctor_only_actions() {
        for action in [
            Action::ListPatients,
            Action::AnnotateAnalysis,
            Action::UpdateAppointmentStatus { assigned: true },
        ] {
            assert_eq!(decide(Role::Doctor, action), Decision::Allow);
            assert!(!decide(Role::Patient, action).is_allowed());
        }
    }

    #[test]
    fn test_only_patients_book() {
        assert_eq!(decide(Role::Patient, Action::BookAppointment), Decision::Allow);
        assert_eq!(
            decide(Role::Doctor, Action::BookAppointment),
            Decision::Deny {
                role: Role::Doctor,
                action: "book_appointment",
            }
        );
    }

    #[test]
    fn test_patient_history_requires_ownership() {
        assert!(decide(Role::Patient, Action::ViewPatientHistory { own: true }).is_allowed());
        assert!(!decide(Role::Patient, Action::ViewPatientHistory { own: false }).is_allowed());
        assert!(decide(Role::Doctor, Action::ViewPatientHistory { own: false }).is_allowed());
        assert!(!decide(Role::Patient, Action::GeneratePatientReport { own: false }).is_allowed());
    }

    #[test]
    fn test_appointment_update_requires_assignment() {
        assert_eq!(
            decide(Role::Doctor, Action::UpdateAppointmentStatus { assigned: false }),
            Decision::Deny {
                role: Role::Doctor,
                action: "update_unassigned_appointment_status",
            }
        );
        assert!(
            !decide(Role::Patient, Action::UpdateAppointmentStatus { assigned: false })
                .is_allowed()
        );
    }

    #[test]
    fn test_require_reports_action_name() {
        let err = require(Role::Patient, Action::ListPatients).unwrap_err();
        assert_eq!(err.to_string(), "patient may not list_patients");
        assert!(require(Role::Doctor, Action::ListPatients).is_ok());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Doctor".parse::<Role>(), Ok(Role::Doctor));
        assert_eq!(" patient ".parse::<Role>(), Ok(Role::Patient));
        assert!("nurse".parse::<Role>().is_err());
    }
}
