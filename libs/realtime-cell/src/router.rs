use axum::{routing::get, Router};

use crate::handlers::{realtime_connect, RealtimeState};

pub fn create_realtime_router(state: RealtimeState) -> Router {
    Router::new()
        .route("/realtime", get(realtime_connect))
        .with_state(state)
}
