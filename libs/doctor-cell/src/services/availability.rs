use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use realtime_cell::{EventActor, EventBus, EventInput, Role};

use crate::models::{AvailabilityError, AvailabilityWindow, UpsertAvailabilityRequest};
use crate::services::store::AvailabilityStore;

/// Doctor-side editing of availability windows.
pub struct AvailabilityService {
    store: Arc<dyn AvailabilityStore>,
    bus: Arc<EventBus>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn AvailabilityStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    pub async fn get_window(&self, doctor_id: &str, date: NaiveDate) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        self.store.find_window(doctor_id, date).await
    }

    /// Replaces the doctor's window for `request.date`. Slots are derived on
    /// read, so the next slot query already reflects the new window.
    pub async fn upsert_window(
        &self,
        doctor_id: &str,
        request: UpsertAvailabilityRequest,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        debug!("Upserting availability for doctor {} on {}", doctor_id, request.date);

        let existing = self.store.find_window(doctor_id, request.date).await?;

        let window = AvailabilityWindow {
            id: existing.map_or_else(Uuid::new_v4, |w| w.id),
            doctor_id: doctor_id.to_string(),
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
            slot_duration: request.slot_duration,
            break_start: request.break_start,
            break_end: request.break_end,
            is_available: request.is_available.unwrap_or(true),
            updated_at: Utc::now(),
        };
        window.validate()?;

        let saved = self.store.save_window(window).await?;
        info!("Availability for doctor {} on {} replaced", doctor_id, saved.date);

        let payload = serde_json::to_value(&saved).unwrap_or_default();
        self.bus
            .publish(EventInput::availability_updated(
                EventActor::new(doctor_id, Role::Doctor),
                doctor_id,
                saved.date,
                payload,
            ))
            .await;

        Ok(saved)
    }
}
