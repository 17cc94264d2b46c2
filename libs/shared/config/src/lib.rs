use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub admin_jwt_secret: String,
    pub redis_url: Option<String>,
    pub event_channel: String,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_timeout_secs: u64,
    pub booking: BookingRules,
    pub realtime: RealtimeSettings,
    pub port: u16,
}

/// Tunables for the booking guard and follow-up chain.
#[derive(Debug, Clone)]
pub struct BookingRules {
    pub horizon_months: u32,
    pub default_consultation_fee: f64,
    pub follow_up_window_days: i64,
    pub default_follow_up_percentage: u8,
    pub notification_queue_capacity: usize,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            horizon_months: 3,
            default_consultation_fee: 100.0,
            follow_up_window_days: 3,
            default_follow_up_percentage: 50,
            notification_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub connection_buffer: usize,
    pub publish_timeout_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 25,
            ping_timeout_secs: 60,
            connection_buffer: 64,
            publish_timeout_ms: 2000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let booking_defaults = BookingRules::default();
        let realtime_defaults = RealtimeSettings::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            admin_jwt_secret: env::var("ADMIN_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("ADMIN_JWT_SECRET not set, admin connections will be rejected");
                    String::new()
                }),
            redis_url: optional_var("REDIS_URL"),
            event_channel: env::var("EVENT_CHANNEL")
                .unwrap_or_else(|_| "clinic:domain-events".to_string()),
            email_api_url: optional_var("EMAIL_API_URL"),
            email_api_key: optional_var("EMAIL_API_KEY"),
            email_timeout_secs: parsed_var("EMAIL_TIMEOUT_SECS", 10),
            booking: BookingRules {
                horizon_months: parsed_var("BOOKING_HORIZON_MONTHS", booking_defaults.horizon_months),
                default_consultation_fee: parsed_var(
                    "DEFAULT_CONSULTATION_FEE",
                    booking_defaults.default_consultation_fee,
                ),
                follow_up_window_days: parsed_var(
                    "FOLLOW_UP_WINDOW_DAYS",
                    booking_defaults.follow_up_window_days,
                ),
                default_follow_up_percentage: parsed_var(
                    "DEFAULT_FOLLOW_UP_PERCENTAGE",
                    booking_defaults.default_follow_up_percentage,
                ),
                notification_queue_capacity: parsed_var(
                    "NOTIFICATION_QUEUE_CAPACITY",
                    booking_defaults.notification_queue_capacity,
                ),
            },
            realtime: RealtimeSettings {
                ping_interval_secs: parsed_var("WS_PING_INTERVAL_SECS", realtime_defaults.ping_interval_secs),
                ping_timeout_secs: parsed_var("WS_PING_TIMEOUT_SECS", realtime_defaults.ping_timeout_secs),
                connection_buffer: parsed_var("WS_CONNECTION_BUFFER", realtime_defaults.connection_buffer),
                publish_timeout_ms: parsed_var("EVENT_PUBLISH_TIMEOUT_MS", realtime_defaults.publish_timeout_ms),
            },
            port: parsed_var("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if config.redis_url.is_none() {
            warn!("REDIS_URL not set - realtime events will only reach sockets on this process");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_email_configured(&self) -> bool {
        self.email_api_url.as_deref().map_or(false, |url| !url.is_empty())
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_rules_defaults_match_clinic_policy() {
        let rules = BookingRules::default();
        assert_eq!(rules.horizon_months, 3);
        assert_eq!(rules.follow_up_window_days, 3);
        assert_eq!(rules.default_follow_up_percentage, 50);
    }

    #[test]
    fn parsed_var_falls_back_on_garbage() {
        env::set_var("SHARED_CONFIG_TEST_GARBAGE", "not-a-number");
        assert_eq!(parsed_var("SHARED_CONFIG_TEST_GARBAGE", 7u32), 7);
        env::remove_var("SHARED_CONFIG_TEST_GARBAGE");
    }

    #[test]
    fn email_configuration_requires_url() {
        let mut config = AppConfig::from_env();
        config.email_api_url = None;
        assert!(!config.is_email_configured());
        config.email_api_url = Some("https://mail.example.com/send".to_string());
        assert!(config.is_email_configured());
    }
}
