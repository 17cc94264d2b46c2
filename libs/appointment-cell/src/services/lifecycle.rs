// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use realtime_cell::Identity;

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

/// Appointment status state machine.
///
/// Doctors move an appointment forward one step at a time
/// (`pending -> confirmed -> in_progress -> completed`). Either party may
/// cancel any non-terminal appointment, with a reason. `completed`,
/// `cancelled` and `no_show` accept nothing further.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
            AppointmentStatus::Confirmed => vec![AppointmentStatus::InProgress, AppointmentStatus::Cancelled],
            AppointmentStatus::InProgress => vec![AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Checks that `actor` may move `appointment` to `new_status`.
    pub fn validate_status_transition(
        &self,
        appointment: &Appointment,
        new_status: AppointmentStatus,
        actor: &Identity,
        reason: Option<&str>,
    ) -> Result<(), AppointmentError> {
        let current_status = appointment.status;
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        if new_status == AppointmentStatus::Cancelled {
            if !appointment.involves(&actor.uid) {
                return Err(AppointmentError::Unauthorized);
            }
            if reason.map_or(true, |r| r.trim().is_empty()) {
                return Err(AppointmentError::ValidationError(
                    "A cancellation reason is required".to_string(),
                ));
            }
        } else if appointment.doctor_id != actor.uid {
            return Err(AppointmentError::Unauthorized);
        }

        Ok(())
    }
}
