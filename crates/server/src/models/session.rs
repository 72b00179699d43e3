//! Session-related types.
//!
//! Keys for values stored in the cookie session.

/// Session keys for client identity.
pub mod keys {
    /// Key for the random client id issued on first contact.
    pub const CLIENT_ID: &str = "client_id";

    /// Key for the random alias published as the creator of anonymous polls.
    pub const CREATOR_ALIAS: &str = "creator_alias";

    /// Key for the normalized email the client last signed in with.
    pub const CURRENT_VOTER: &str = "current_voter";
}
