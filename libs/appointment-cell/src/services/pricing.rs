use tracing::debug;

use doctor_cell::DoctorPricing;
use shared_config::BookingRules;

/// Consultation and follow-up fees.
#[derive(Debug, Clone)]
pub struct PricingService {
    default_fee: f64,
    default_follow_up_percentage: u8,
}

impl PricingService {
    pub fn new(rules: &BookingRules) -> Self {
        Self {
            default_fee: rules.default_consultation_fee,
            default_follow_up_percentage: rules.default_follow_up_percentage,
        }
    }

    /// `hourly_rate * duration / 60` when the doctor has a rate, else the
    /// default fee.
    pub fn consultation_fee(&self, pricing: &DoctorPricing, slot_duration: u32) -> f64 {
        let fee = match pricing.hourly_rate {
            Some(rate) if rate > 0.0 => round_cents(rate * f64::from(slot_duration) / 60.0),
            _ => self.default_fee,
        };
        debug!("Consultation fee {:.2} for {} minutes", fee, slot_duration);
        fee
    }

    pub fn follow_up_fee(&self, pricing: &DoctorPricing, full_fee: f64) -> f64 {
        let percentage = pricing
            .follow_up_percentage
            .unwrap_or(self.default_follow_up_percentage);
        round_cents(full_fee * f64::from(percentage) / 100.0)
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
