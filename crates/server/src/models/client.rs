//! Client identity attached to every request.

use quickpoll_core::Email;

/// Who is making a request.
///
/// The client id comes from the cookie session and survives page reloads.
/// The IP address and user agent are taken from the request as-is.
///
/// The client id doubles as a duplicate-vote key, so it is never published.
/// Anything shown to other clients uses `creator_alias` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: String,
    /// Random token issued alongside the client id, unrelated to it.
    pub creator_alias: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Email the client signed in with, if any.
    pub signed_in_email: Option<Email>,
}

impl ClientInfo {
    /// Synthetic creator id for polls created without an email.
    #[must_use]
    pub fn anonymous_id(&self) -> String {
        format!("anonymous_{}", self.creator_alias)
    }
}
