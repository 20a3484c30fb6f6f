use super::client::RequestOptions;
use super::session::{Session, SessionEvent};
use super::{Booking, BookingStatus, NewBooking};
use crate::errors::TouristError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const BOOKINGS_PATH: &str = "/api/bookings";

/// What the booking store currently holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingState {
    /// The caller's bookings, in the order the API returned them.
    pub bookings: Vec<Booking>,
    pub is_loading: bool,
    /// Message of the last failed fetch, for inline display.
    pub error: Option<String>,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: BookingStatus,
}

/// Read-through cache of "my bookings".
///
/// Every write is followed by a full refetch; the cache is never patched
/// locally because the API joins in display fields (guide and tourist names).
#[derive(Debug)]
pub struct BookingStore {
    session: Arc<Session>,
    state: Mutex<BookingState>,
    /// Bumped by every fetch and by `clear()`. A fetch result is applied only
    /// if nothing newer happened while it was in flight.
    generation: AtomicU64,
}

impl BookingStore {
    /// Creates a store that is not wired to the session's logout.
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            state: Mutex::new(BookingState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Creates a store that clears itself whenever the session logs out.
    pub fn attach(session: &Arc<Session>) -> Arc<Self> {
        let store = Arc::new(Self::new(session.clone()));
        let weak = Arc::downgrade(&store);

        session.subscribe(move |event| {
            if let (SessionEvent::LoggedOut, Some(store)) = (event, weak.upgrade()) {
                store.clear();
            }
        });

        store
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn lock(&self) -> MutexGuard<'_, BookingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BookingState {
        self.lock().clone()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.lock().bookings.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    /// Replaces the cached list with `GET /api/bookings/my-bookings`.
    ///
    /// A failure is recorded in `error()` and also returned.
    pub fn fetch_bookings(&self) -> Result<(), TouristError> {
        self.session.require_token()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        let result = self.session.request_json::<Vec<Booking>>(
            &format!("{}/my-bookings", BOOKINGS_PATH),
            RequestOptions::get(),
        );

        let mut state = self.lock();

        if self.generation.load(Ordering::SeqCst) != generation {
            log::debug!("discarding stale bookings response (generation {})", generation);
            return result.map(|_| ());
        }

        state.is_loading = false;

        match result {
            Ok(bookings) => {
                log::debug!("loaded {} bookings", bookings.len());
                state.bookings = bookings;
                Ok(())
            }
            Err(err) => {
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Sends a booking request to a guide, then refreshes the list.
    pub fn create_booking(&self, booking: &NewBooking) -> Result<Booking, TouristError> {
        self.session.require_token()?;

        let created = self
            .session
            .request_json::<Booking>(BOOKINGS_PATH, RequestOptions::post(booking)?)?;

        log::info!("created booking {} for guide {}", created.id, created.guide_user_id);
        self.refresh_after_write();

        Ok(created)
    }

    /// Moves a booking to `status`, then refreshes the list.
    pub fn update_booking_status(
        &self,
        booking_id: i64,
        status: BookingStatus,
    ) -> Result<Booking, TouristError> {
        self.session.require_token()?;

        let updated = self.session.request_json::<Booking>(
            &format!("{}/{}/status", BOOKINGS_PATH, booking_id),
            RequestOptions::patch(&StatusUpdate { status })?,
        )?;

        log::info!("booking {} is now {}", booking_id, status.as_str());
        self.refresh_after_write();

        Ok(updated)
    }

    /// Looks up a single booking. The cache is left alone.
    pub fn get_booking(&self, booking_id: i64) -> Result<Booking, TouristError> {
        self.session.require_token()?;

        self.session.request_json::<Booking>(
            &format!("{}/{}", BOOKINGS_PATH, booking_id),
            RequestOptions::get(),
        )
    }

    // The write already went through, so a failed refresh only shows up in `error()`
    fn refresh_after_write(&self) {
        if let Err(err) = self.fetch_bookings() {
            log::warn!("failed to refresh bookings after write: {}", err);
        }
    }

    /// Empties the store. Any fetch still in flight is discarded when it lands.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock() = BookingState::default();
    }
}
