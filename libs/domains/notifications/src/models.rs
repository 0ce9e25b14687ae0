//! Data models for the notifications domain.

use amqp_worker::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Why an email is being sent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailKind {
    /// Account created in the users service.
    Welcome,
    /// Appointment booked, moved or cancelled in the agenda service.
    AppointmentUpdate,
    /// Tutoring session reminder.
    TutoringReminder,
    #[default]
    General,
}

/// An email notification carried over `notificaciones_email_queue`.
///
/// ```json
/// {
///   "id": "6f1c...",
///   "kind": "welcome",
///   "to": "ana@example.com",
///   "subject": "Bienvenida",
///   "body": "...",
///   "created_at": "2026-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EmailNotification {
    pub id: Uuid,
    #[serde(default)]
    pub kind: EmailKind,
    #[validate(email)]
    pub to: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl EmailNotification {
    pub fn new(
        kind: EmailKind,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

impl Job for EmailNotification {
    fn job_id(&self) -> String {
        self.id.to_string()
    }

    fn job_type(&self) -> &'static str {
        "email_notification"
    }
}
