pub mod booking;
pub mod lifecycle;
pub mod notification;
pub mod pricing;
pub mod store;

pub use booking::BookingGuard;
pub use lifecycle::AppointmentLifecycleService;
pub use notification::{
    EmailMessage, EmailSender, HttpEmailSender, LogOnlyEmailSender, NotificationError, NotificationJob,
    NotificationQueue,
};
pub use pricing::PricingService;
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
