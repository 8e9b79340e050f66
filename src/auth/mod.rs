//! Login, two-factor continuation and logout against `action=clientlogin`.
//!
//! # Flow
//!
//! 1. Fetch a login token (`meta=tokens&type=login`).
//! 2. POST `clientlogin` with the credentials and token.
//! 3. Map the status to an [`AuthStatus`] and persist the session:
//!    - `PASS` stores the logged-in flag and the jar's cookie header.
//!    - `FAIL` and a two-factor prompt store the logged-out flag.
//!    - anything else leaves the store alone.
//!
//! A two-factor prompt moves the controller to [`AuthState::TwoFactorPending`],
//! the only state that accepts [`AuthController::login_with_code`].

mod status;

pub use status::{AuthState, AuthStatus};

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, MwApi};
use crate::config::ClientConfig;
use crate::session::{SessionState, SessionStore};

use status::interpret_login_response;

const LOGIN_TOKEN_PATH: &str = "/query/tokens/@logintoken";
const CSRF_TOKEN_PATH: &str = "/query/tokens/@csrftoken";

/// Drives the login state machine and owns session persistence.
pub struct AuthController {
    api: Arc<MwApi>,
    store: Arc<dyn SessionStore>,
    state: Mutex<AuthState>,
    login_return_url: String,
}

impl std::fmt::Debug for AuthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthController")
            .field("api", &self.api)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AuthController {
    /// Creates a controller and restores any persisted session cookie into
    /// the transport's jar. Credentials are sent with
    /// `config.login_return_url`.
    #[must_use]
    pub fn new(api: Arc<MwApi>, store: Arc<dyn SessionStore>, config: &ClientConfig) -> Self {
        let session = SessionState::load(store.as_ref());
        if let Some(cookie) = &session.auth_cookie {
            api.restore_auth_cookie(cookie);
            debug!("Restored persisted session cookie");
        }
        let state = if session.is_logged_in {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        Self {
            api,
            store,
            state: Mutex::new(state),
            login_return_url: config.login_return_url.clone(),
        }
    }

    /// Current flow state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the persisted session says the user is logged in.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        SessionState::load(self.store.as_ref()).is_logged_in
    }

    /// Logs in with username and password.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the token fetch or the credential POST fails,
    /// or when persisting the outcome fails. A rejected login is an `Ok`
    /// [`AuthStatus`]. A failed request leaves the state as it was.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthStatus, ApiError> {
        self.attempt(username, password, None).await
    }

    /// Completes a login that answered [`AuthStatus::TwoFactorRequired`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidState`] unless the controller is in
    /// [`AuthState::TwoFactorPending`]; otherwise as [`login`](Self::login).
    /// A failed request keeps the controller pending, so the code can be
    /// resubmitted.
    #[instrument(skip(self, password, code))]
    pub async fn login_with_code(
        &self,
        username: &str,
        password: &str,
        code: &str,
    ) -> Result<AuthStatus, ApiError> {
        let current = self.state();
        if current != AuthState::TwoFactorPending {
            return Err(ApiError::InvalidState {
                expected: AuthState::TwoFactorPending.as_str(),
                actual: current.as_str(),
            });
        }
        self.attempt(username, password, Some(code)).await
    }

    /// Logs out remotely if possible and always clears the local session.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(error) = self.remote_logout().await {
            warn!(%error, "Remote logout failed; clearing local session anyway");
        }
        self.api.clear_auth_cookie();
        if let Err(error) = SessionState::logged_out().save(self.store.as_ref()) {
            warn!(%error, "Failed to persist logged-out session");
        }
        self.set_state(AuthState::Unauthenticated);
        info!("Logged out");
    }

    async fn attempt(
        &self,
        username: &str,
        password: &str,
        code: Option<&str>,
    ) -> Result<AuthStatus, ApiError> {
        // Request failures are not a verdict; only an interpreted status moves to Failed
        let before = self.state();
        let token = self.fetch_login_token().await?;
        self.set_state(AuthState::TokenFetched);

        let mut request = self
            .api
            .action("clientlogin")
            .param("rememberMe", "1")
            .param("username", username)
            .param("password", password)
            .param("logintoken", token)
            .param("loginreturnurl", &self.login_return_url);
        if let Some(code) = code {
            request = request.param("logincontinue", "1").param("OATHToken", code);
        }

        self.set_state(AuthState::Submitted);
        let response = match request.post().await {
            Ok(response) => response,
            Err(error) => {
                self.set_state(before);
                return Err(error);
            }
        };

        let status = interpret_login_response(&response);
        self.persist_outcome(&status)?;
        self.set_state(AuthState::from(&status));
        info!(username, outcome = %status, "Login attempt finished");
        Ok(status)
    }

    async fn fetch_login_token(&self) -> Result<String, ApiError> {
        let token = self
            .api
            .action("query")
            .param("meta", "tokens")
            .param("type", "login")
            .get()
            .await?
            .get_string(LOGIN_TOKEN_PATH);
        debug!(present = !token.is_empty(), "Fetched login token");
        Ok(token)
    }

    async fn remote_logout(&self) -> Result<(), ApiError> {
        let token = self
            .api
            .action("query")
            .param("meta", "tokens")
            .param("type", "csrf")
            .get()
            .await?
            .get_string(CSRF_TOKEN_PATH);
        self.api.action("logout").param("token", token).post().await?;
        Ok(())
    }

    fn persist_outcome(&self, status: &AuthStatus) -> Result<(), ApiError> {
        let session = match status {
            AuthStatus::Pass => SessionState {
                is_logged_in: true,
                auth_cookie: self.api.auth_cookie(),
            },
            AuthStatus::Fail(_) => {
                self.api.clear_auth_cookie();
                SessionState::logged_out()
            }
            // The jar carries the pending login to the code submission
            AuthStatus::TwoFactorRequired => SessionState::logged_out(),
            AuthStatus::GenericError(_) => return Ok(()),
        };
        session.save(self.store.as_ref())?;
        Ok(())
    }

    fn set_state(&self, next: AuthState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = %*state, to = %next, "Auth state change");
        *state = next;
    }
}
