use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod bookings;
pub mod client;
pub mod profiles;
pub mod session;
pub mod user;

/// Role a user account was created with.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Tourist,
    Guide,
    Business,
    Admin,
}

/// User object returned by `GET /auth/me` and `POST /users/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    /// Deactivated accounts cannot authenticate.
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
    /// Set once KYC has completed.
    #[serde(default)]
    pub identity_verified: bool,
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl User {
    /// Display name of the user, falling back to the email when no name is set.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        if name.trim().is_empty() {
            self.email.clone()
        } else {
            name.trim().to_string()
        }
    }
}

/// Data returned by the token endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime of the token in seconds.
    pub expires_in: Option<i64>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Lifecycle of a booking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    #[serde(alias = "cancelled")]
    Canceled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Completed => "completed",
        }
    }
}

/// Booking object which gets returned by the bookings endpoints.
///
/// The name and email fields are joined in by the backend, which is why the
/// booking store always refetches instead of patching its cache locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    /// The tourist who requested the booking.
    #[serde(rename = "user_id")]
    pub tourist_user_id: i64,
    /// The guide the booking was sent to.
    #[serde(rename = "guide_id")]
    pub guide_user_id: i64,
    pub tour_date: DateTime<Utc>,
    pub message: Option<String>,
    pub status: BookingStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub tourist_name: Option<String>,
    #[serde(default)]
    pub tourist_email: Option<String>,
    #[serde(default)]
    pub guide_name: Option<String>,
    #[serde(default)]
    pub guide_email: Option<String>,
}

/// Payload for `BookingStore::create_booking()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub guide_id: i64,
    pub tour_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
