use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{Appointment, Party};
use crate::services::store::AppointmentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Email provider rejected the message: {0}")]
    Rejected(String),

    #[error("Email transport error: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// Posts messages as JSON to the configured email API.
#[cfg_attr(test, derive(Debug))]
pub struct HttpEmailSender {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpEmailSender {
    /// Every request is bounded by `timeout` so one slow call cannot hold up
    /// the queue behind it.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }

    /// `Ok(None)` when no provider is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotificationError> {
        if !config.is_email_configured() {
            return Ok(None);
        }
        let (Some(url), Some(key)) = (config.email_api_url.clone(), config.email_api_key.clone()) else {
            return Ok(None);
        };
        Self::new(url, key, Duration::from_secs(config.email_timeout_secs)).map(Some)
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Transport(format!("email API timed out: {}", e))
                } else {
                    NotificationError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected(format!("{}: {}", status, text)));
        }
        Ok(())
    }
}

/// Used when no email provider is configured.
#[derive(Debug, Default)]
pub struct LogOnlyEmailSender;

#[async_trait]
impl EmailSender for LogOnlyEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!("Email to {} not sent (no provider configured): {}", message.to, message.subject);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum NotificationJob {
    BookingConfirmation { appointment: Appointment },
}

/// Bounded hand-off to a background worker so booking never waits on email.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationJob>,
}

impl NotificationQueue {
    pub fn start(
        capacity: usize,
        email: Arc<dyn EmailSender>,
        appointments: Arc<dyn AppointmentStore>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                process_job(job, email.as_ref(), appointments.as_ref()).await;
            }
            debug!("Notification queue closed");
        });
        (Self { sender }, handle)
    }

    pub fn enqueue(&self, job: NotificationJob) {
        if let Err(e) = self.sender.try_send(job) {
            warn!("Dropping notification job: {}", e);
        }
    }
}

async fn process_job(job: NotificationJob, email: &dyn EmailSender, appointments: &dyn AppointmentStore) {
    match job {
        NotificationJob::BookingConfirmation { appointment } => {
            for (party, uid) in [
                (Party::Patient, appointment.patient_id.as_str()),
                (Party::Doctor, appointment.doctor_id.as_str()),
            ] {
                let contact = match appointments.party_contact(party, uid).await {
                    Ok(Some(contact)) => contact,
                    Ok(None) => {
                        debug!("No contact on file for {:?} {}", party, uid);
                        continue;
                    }
                    Err(e) => {
                        error!("Failed to load contact for {:?} {}: {}", party, uid, e);
                        continue;
                    }
                };
                let Some(address) = contact.email else {
                    continue;
                };

                let message = booking_confirmation(&appointment, party, &contact.full_name, address);
                if let Err(e) = email.send(message).await {
                    error!("Failed to send booking confirmation for {}: {}", appointment.id, e);
                }
            }
        }
    }
}

fn booking_confirmation(appointment: &Appointment, party: Party, name: &str, to: String) -> EmailMessage {
    let kind = if appointment.is_follow_up { "follow-up appointment" } else { "appointment" };
    let subject = format!("Your {} on {} at {}", kind, appointment.appointment_date, appointment.start_time);
    let body = match party {
        Party::Patient => format!(
            "Hello {},\n\nYour {} is booked for {} from {} to {}. Fee: {:.2}.",
            name, kind, appointment.appointment_date, appointment.start_time, appointment.end_time,
            appointment.consultation_fee
        ),
        Party::Doctor => format!(
            "Hello {},\n\nA new {} was booked for {} from {} to {}.",
            name, kind, appointment.appointment_date, appointment.start_time, appointment.end_time
        ),
    };
    EmailMessage { to, subject, body }
}
