use super::client::{ApiClient, ClientOptions, Credentials, Payload, RequestOptions};
use super::{AccessToken, User};
use crate::errors::TouristError;
use crate::storage::{FileTokenStore, MemoryTokenStore, TokenStore};
use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something that happened to the session. Published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session became authenticated as this user.
    LoggedIn(User),
    /// Token and user were dropped, either by `logout()` or because the API
    /// rejected the token.
    LoggedOut,
}

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Snapshot of the session's authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub token: Option<String>,
    pub user: Option<User>,
    /// True iff `token` and `user` are both present and the last user fetch succeeded.
    pub is_authenticated: bool,
    /// Set while `initialize()` or `login()` is in flight.
    pub is_loading: bool,
    /// When the token stops being accepted, when known.
    pub expires_at: Option<DateTime<Utc>>,
}

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Session store. Owns the bearer token and the current user.
///
/// Share it through an `Arc`; dependent stores hold a clone and read the
/// token from it.
pub struct Session {
    api: ApiClient,
    storage: Box<dyn TokenStore>,
    state: Mutex<SessionState>,
    /// Guards `initialize()` against re-entry.
    initializing: AtomicBool,
    in_flight: AtomicUsize,
    listeners: Mutex<Vec<Listener>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("api", &self.api)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session talking to the API described by `options`.
    ///
    /// The token is persisted to `options.token_path` when set, in memory otherwise.
    pub fn new(options: ClientOptions) -> Result<Arc<Self>, TouristError> {
        let api = ApiClient::new(&options)?;

        let storage: Box<dyn TokenStore> = match &options.token_path {
            Some(path) => Box::new(FileTokenStore::new(path)),
            None => Box::new(MemoryTokenStore::new()),
        };

        Ok(Arc::new(Self::with_parts(api, storage)))
    }

    /// Creates an empty session from an existing client and token store.
    pub fn with_parts(api: ApiClient, storage: Box<dyn TokenStore>) -> Self {
        Self {
            api,
            storage,
            state: Mutex::new(SessionState::default()),
            initializing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        let mut state = self.lock().clone();
        state.is_loading = self.is_loading();
        state
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated() {
            SessionPhase::Authenticated
        } else if self.is_loading() {
            SessionPhase::Authenticating
        } else {
            SessionPhase::Anonymous
        }
    }

    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// The current token, or `NotAuthenticated`.
    pub fn require_token(&self) -> Result<String, TouristError> {
        self.token().ok_or(TouristError::NotAuthenticated)
    }

    /// Registers an observer for login and logout.
    ///
    /// Listeners run on the thread that caused the event, after the session
    /// state has been updated and with no session lock held.
    pub fn subscribe(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    fn publish(&self, event: SessionEvent) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            listener(&event);
        }
    }

    /// Restores the session from the persisted token.
    ///
    /// Returns `false` without doing anything if another `initialize()` or a
    /// `login()` is already running. Failures are not returned: the persisted
    /// token is dropped and the session is left anonymous.
    pub fn initialize(&self) -> bool {
        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("initialize() already in progress, skipping");
            return false;
        }

        // Also a no-op while a login is loading
        if self.is_loading() {
            self.initializing.store(false, Ordering::SeqCst);
            log::debug!("login in progress, skipping initialize()");
            return false;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        scopeguard::defer! {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.initializing.store(false, Ordering::SeqCst);
        }

        let token = match self.storage.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                log::debug!("no persisted token, session stays anonymous");
                return true;
            }
            Err(err) => {
                log::warn!("failed to read persisted token: {}", err);
                self.logout();
                return true;
            }
        };

        let expires_at = token_expiry(&token);

        // Don't bother the API with a token we know is dead
        if matches!(expires_at, Some(exp) if exp <= Utc::now()) {
            log::info!("persisted token has expired, discarding it");
            self.logout();
            return true;
        }

        {
            let mut state = self.lock();
            state.token = Some(token);
            state.expires_at = expires_at;
        }

        if let Err(err) = self.fetch_current_user() {
            log::warn!("failed to restore session: {}", err);

            // A 401 has already logged us out
            if self.token().is_some() {
                self.logout();
            }
        }

        true
    }

    /// Exchanges credentials for a token, then loads the current user.
    pub fn login(&self, email: &str, password: &str) -> Result<User, TouristError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        scopeguard::defer! {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let form = RequestOptions::form(&[("username", email), ("password", password)]);

        let token = match self
            .api
            .request_json::<AccessToken>("/auth/token", form, None)
        {
            Ok(token) => token,
            Err(TouristError::RequestFailed { detail, .. }) => {
                let message = detail.unwrap_or_else(|| "Login failed".to_string());
                self.api
                    .debug_line(&format!("Failed to authenticate: {}", message));
                return Err(TouristError::Authentication(message));
            }
            Err(err) => return Err(err),
        };

        // A new login replaces whoever was signed in before
        {
            let mut state = self.lock();
            state.user = None;
            state.is_authenticated = false;
        }
        self.adopt_token(&token);

        let user = self.fetch_current_user()?;

        log::info!("logged in as user {}", user.id);
        self.api
            .debug_line(&format!("Welcome, {}.", user.display_name()));

        Ok(user)
    }

    /// Persists a freshly issued token and makes it current.
    fn adopt_token(&self, token: &AccessToken) {
        if let Err(err) = self.storage.save(&token.access_token) {
            log::warn!("failed to persist access token: {}", err);
        }

        // An out of range `expires_in` counts as unknown
        let expires_at = token
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .or_else(|| token_expiry(&token.access_token));

        let mut state = self.lock();
        state.token = Some(token.access_token.clone());
        state.expires_at = expires_at;
    }

    /// Reloads the current user from `GET /auth/me`.
    pub fn fetch_current_user(&self) -> Result<User, TouristError> {
        let token = self.require_token()?;

        let user = match self.request_json::<User>("/auth/me", RequestOptions::get()) {
            Ok(user) => user,
            Err(err) => {
                {
                    let mut state = self.lock();
                    state.user = None;
                    state.is_authenticated = false;
                }

                return Err(match err {
                    TouristError::RequestFailed { status, detail } => {
                        TouristError::FetchFailed { status, detail }
                    }
                    other => other,
                });
            }
        };

        let newly_authenticated = {
            let mut state = self.lock();

            // The session was logged out (or re-logged) while we were waiting
            if state.token.as_deref() != Some(token.as_str()) {
                return Err(TouristError::NotAuthenticated);
            }

            let was_authenticated = state.is_authenticated;
            state.user = Some(user.clone());
            state.is_authenticated = true;
            !was_authenticated
        };

        if newly_authenticated {
            self.publish(SessionEvent::LoggedIn(user.clone()));
        }

        Ok(user)
    }

    /// Swaps in a newer copy of the signed-in user, e.g. after an account update.
    pub(crate) fn replace_user(&self, user: &User) {
        let mut state = self.lock();

        if state.is_authenticated && state.user.as_ref().map(|u| u.id) == Some(user.id) {
            state.user = Some(user.clone());
        }
    }

    /// Trades the current token for a fresh one via `POST /auth/refresh`.
    pub fn refresh_token(&self) -> Result<(), TouristError> {
        self.require_token()?;

        let token = self.request_json::<AccessToken>(
            "/auth/refresh",
            RequestOptions::empty(Method::POST),
        )?;

        self.adopt_token(&token);
        log::debug!("access token refreshed");

        Ok(())
    }

    /// Drops the token and the user, locally and in storage.
    ///
    /// Never touches the network and is safe to call in any state.
    pub fn logout(&self) {
        if let Err(err) = self.storage.clear() {
            log::warn!("failed to clear persisted token: {}", err);
        }

        {
            let mut state = self.lock();
            state.token = None;
            state.user = None;
            state.is_authenticated = false;
            state.expires_at = None;
        }

        log::debug!("session logged out");
        self.publish(SessionEvent::LoggedOut);
    }

    /// Sends a request with this session's bearer token attached.
    pub fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Payload, TouristError> {
        self.api.request(endpoint, options, Some(self as &dyn Credentials))
    }

    pub fn request_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, TouristError> {
        self.api
            .request_json(endpoint, options, Some(self as &dyn Credentials))
    }
}

impl Credentials for Session {
    fn bearer_token(&self) -> Option<String> {
        self.token()
    }

    fn unauthorized(&self) {
        self.logout();
    }
}

/// Reads the `exp` claim of a JWT. `None` if the token is not a JWT or has no expiry.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;

    DateTime::from_timestamp(exp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let header = BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = BASE64_URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"a@b.com","exp":{}}}"#, exp));
        format!("{}.{}.signature", header, claims)
    }

    #[test]
    fn reads_jwt_expiry() {
        let token = jwt_with_exp(1_700_000_000);
        assert_eq!(token_expiry(&token), DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn opaque_tokens_have_no_expiry() {
        assert_eq!(token_expiry("abc"), None);
        assert_eq!(token_expiry("a.!!!.c"), None);

        let no_exp = format!("x.{}.y", BASE64_URL_SAFE_NO_PAD.encode(r#"{"sub":"a"}"#));
        assert_eq!(token_expiry(&no_exp), None);
    }
}
