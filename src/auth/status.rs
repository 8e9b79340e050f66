//! Login outcomes and the `clientlogin` status mapping.

use std::fmt;

use crate::api::ApiResult;

const STATUS_PATH: &str = "/clientlogin/@status";
const MESSAGE_CODE_PATH: &str = "/clientlogin/@messagecode";
const REQUESTS_PATH: &str = "/clientlogin/requests/_v";

const TOTP_REQUEST_ID: &str = "TOTPAuthenticationRequest";
const OATH_PROVIDER_MARKER: &str = "(OATH)";

/// Result of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// Credentials accepted; the session is persisted.
    Pass,
    /// Credentials rejected, with the server's message code (e.g. `wrongpassword`).
    Fail(String),
    /// The account needs a one-time code; call `login_with_code` next.
    TwoFactorRequired,
    /// Any other status, as `genericerror-<STATUS>`.
    GenericError(String),
}

impl AuthStatus {
    /// The wire-style code for this outcome (`PASS`, `2FA`, message code, ...).
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Pass => "PASS",
            Self::TwoFactorRequired => "2FA",
            Self::Fail(code) | Self::GenericError(code) => code,
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Where the controller is in the login flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    /// No session.
    #[default]
    Unauthenticated,
    /// A login token was obtained for the current attempt.
    TokenFetched,
    /// Credentials were posted; waiting for the verdict.
    Submitted,
    /// Logged in.
    Authenticated,
    /// Waiting for a second-factor code.
    TwoFactorPending,
    /// The last attempt did not log in.
    Failed,
}

impl AuthState {
    /// Short name used in errors and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::TokenFetched => "token-fetched",
            Self::Submitted => "submitted",
            Self::Authenticated => "authenticated",
            Self::TwoFactorPending => "two-factor-pending",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&AuthStatus> for AuthState {
    fn from(status: &AuthStatus) -> Self {
        match status {
            AuthStatus::Pass => Self::Authenticated,
            AuthStatus::TwoFactorRequired => Self::TwoFactorPending,
            AuthStatus::Fail(_) | AuthStatus::GenericError(_) => Self::Failed,
        }
    }
}

/// Maps a `clientlogin` response to an [`AuthStatus`].
pub(crate) fn interpret_login_response(result: &ApiResult) -> AuthStatus {
    let status = result.get_string(STATUS_PATH);
    match status.as_str() {
        "PASS" => AuthStatus::Pass,
        "FAIL" => AuthStatus::Fail(result.get_string(MESSAGE_CODE_PATH)),
        "UI" if requests_second_factor(result) => AuthStatus::TwoFactorRequired,
        _ => AuthStatus::GenericError(format!("genericerror-{status}")),
    }
}

fn requests_second_factor(result: &ApiResult) -> bool {
    result.get_nodes(REQUESTS_PATH).iter().any(|request| {
        request.get_string("@id") == TOTP_REQUEST_ID
            && request.get_string("@provider").contains(OATH_PROVIDER_MARKER)
    })
}
