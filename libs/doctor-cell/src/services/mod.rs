pub mod availability;
pub mod slots;
pub mod store;
pub mod time;

pub use availability::AvailabilityService;
pub use slots::{available_slots, compute_slots, is_slot_open, slots_for_view};
pub use store::{AvailabilityStore, InMemoryAvailabilityStore, SupabaseAvailabilityStore};
