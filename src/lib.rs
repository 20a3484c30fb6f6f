//! Rust SDK for the Tourist Platform API: sessions, bookings and profiles.

use std::sync::Arc;

mod errors;
mod storage;
mod structs;
mod transport;

pub use errors::TouristError;
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore, TOKEN_STORAGE_KEY};
pub use structs::bookings::{BookingState, BookingStore};
pub use structs::client::{
    ApiClient, ClientOptions, Credentials, Payload, RequestOptions, DEFAULT_API_URL,
};
pub use structs::profiles::{
    GuideProfile, GuideProfileInput, GuideProfilePublic, Profiles, TouristProfile,
    TouristProfileInput,
};
pub use structs::session::{token_expiry, Session, SessionEvent, SessionPhase, SessionState};
pub use structs::user::{
    validate_password, validate_phone, NewUser, UserUpdate, Users, Verification,
};
pub use structs::{AccessToken, Booking, BookingStatus, NewBooking, User, UserRole};
pub use transport::{HttpRequest, HttpResponse, RequestBody, ReqwestTransport, Transport};

/// Everything an app needs, wired together: the session, a booking store
/// that empties itself on logout, and the profile and account endpoints.
#[derive(Debug, Clone)]
pub struct TouristClient {
    pub session: Arc<Session>,
    pub bookings: Arc<BookingStore>,
    pub profiles: Profiles,
    pub users: Users,
}

impl TouristClient {
    /// Creates a client. Call `session.initialize()` to restore a persisted login.
    pub fn new(options: ClientOptions) -> Result<Self, TouristError> {
        Ok(Self::with_session(Session::new(options)?))
    }

    pub fn with_session(session: Arc<Session>) -> Self {
        Self {
            bookings: BookingStore::attach(&session),
            profiles: Profiles::new(session.clone()),
            users: Users::new(session.clone()),
            session,
        }
    }
}
