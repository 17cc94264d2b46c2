use axum::{
    routing::get,
    Json,
    Router,
};
use serde_json::json;

use appointment_cell::{appointment_routes, handlers::AppointmentCellState};
use doctor_cell::{doctor_routes, handlers::DoctorCellState};
use realtime_cell::{create_realtime_router, handlers::RealtimeState};

pub struct CellStates {
    pub doctors: DoctorCellState,
    pub appointments: AppointmentCellState,
    pub realtime: RealtimeState,
}

pub fn create_router(cells: CellStates) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .nest("/api/doctors", doctor_routes(cells.doctors))
        .nest("/api/appointments", appointment_routes(cells.appointments))
        .merge(create_realtime_router(cells.realtime))
}
