use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::handlers::AppointmentCellState;
use appointment_cell::{
    AppointmentStore, BookingGuard, EmailSender, HttpEmailSender, LogOnlyEmailSender, NotificationQueue,
    SupabaseAppointmentStore,
};
use doctor_cell::handlers::DoctorCellState;
use doctor_cell::{AvailabilityService, AvailabilityStore, SupabaseAvailabilityStore};
use realtime_cell::handlers::RealtimeState;
use realtime_cell::{EventBus, Gatekeeper, SupabaseAccountDirectory};
use shared_config::AppConfig;

use crate::router::CellStates;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // One bus per process, handed to every publisher
    let bus = Arc::new(EventBus::connect(&config).await);
    if bus.start().await.is_none() {
        info!("Event bus running in single-process mode");
    }

    let availability_store: Arc<dyn AvailabilityStore> = Arc::new(SupabaseAvailabilityStore::new(&config));
    let appointment_store: Arc<dyn AppointmentStore> = Arc::new(SupabaseAppointmentStore::new(&config));

    let email: Arc<dyn EmailSender> = match HttpEmailSender::from_config(&config) {
        Ok(Some(sender)) => Arc::new(sender),
        Ok(None) => {
            warn!("Email provider not configured, confirmations will only be logged");
            Arc::new(LogOnlyEmailSender)
        }
        Err(e) => {
            warn!("Email client could not be built ({}), confirmations will only be logged", e);
            Arc::new(LogOnlyEmailSender)
        }
    };
    let (notifications, _notification_worker) = NotificationQueue::start(
        config.booking.notification_queue_capacity,
        email,
        appointment_store.clone(),
    );

    let guard = BookingGuard::new(
        appointment_store,
        availability_store.clone(),
        bus.clone(),
        notifications,
        config.booking.clone(),
    );

    let accounts = Arc::new(SupabaseAccountDirectory::new(&config));
    let cells = CellStates {
        doctors: DoctorCellState {
            config: config.clone(),
            availability: Arc::new(AvailabilityService::new(availability_store, bus.clone())),
        },
        appointments: AppointmentCellState {
            config: config.clone(),
            guard: Arc::new(guard),
        },
        realtime: RealtimeState {
            bus,
            gatekeeper: Arc::new(Gatekeeper::from_config(&config, accounts)),
            settings: config.realtime.clone(),
        },
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(cells)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
