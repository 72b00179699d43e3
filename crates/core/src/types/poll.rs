//! Poll definitions, creation drafts and partial updates.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::email::{Email, EmailError};
use super::id::PollId;

/// Minimum title length in characters (after trimming).
pub const TITLE_MIN_LENGTH: usize = 3;
/// Maximum title length in characters.
pub const TITLE_MAX_LENGTH: usize = 255;
/// Maximum description length in characters.
pub const DESCRIPTION_MAX_LENGTH: usize = 1000;
/// Minimum number of options a poll offers.
pub const MIN_OPTIONS: usize = 2;
/// Maximum number of options a poll offers.
pub const MAX_OPTIONS: usize = 10;
/// Maximum option label length in characters.
pub const OPTION_MAX_LENGTH: usize = 100;
/// Maximum creator display name length in characters.
pub const CREATOR_NAME_MAX_LENGTH: usize = 100;

/// How voters answer a poll and how the answers are tallied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    /// Pick exactly one option.
    Simple,
    /// Rate every option from 1 to 5.
    Rating,
    /// Order every option from most to least preferred.
    Ranking,
}

impl fmt::Display for PollType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Rating => write!(f, "rating"),
            Self::Ranking => write!(f, "ranking"),
        }
    }
}

/// Reasons a poll draft or patch is rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PollValidationError {
    #[error("title must be between {min} and {max} characters")]
    TitleLength { min: usize, max: usize },

    #[error("description must be at most {max} characters")]
    DescriptionTooLong { max: usize },

    #[error("a poll needs between {min} and {max} options (got {actual})")]
    OptionCount {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("option {position} must be between 1 and {max} characters")]
    OptionLength { position: usize, max: usize },

    #[error("creator name must be at most {max} characters")]
    CreatorNameTooLong { max: usize },

    #[error("invalid creator email: {0}")]
    CreatorEmail(#[source] EmailError),

    #[error("invalid email in allow-list: {email}")]
    AllowListEmail {
        email: String,
        #[source]
        source: EmailError,
    },

    #[error("expiry time must be in the future")]
    ExpiryNotInFuture,
}

/// Poll creation request as submitted by a client.
///
/// Nothing here is trusted until [`PollDraft::validate`] has run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub poll_type: PollType,
    pub options: Vec<String>,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub valid_emails: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A draft that passed validation, with every text field trimmed and every
/// email normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub require_auth: bool,
    pub valid_emails: Vec<Email>,
    pub creator_email: Option<Email>,
    pub creator_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PollDraft {
    /// Validate and normalize the draft.
    ///
    /// Blank optional strings are treated as absent. The allow-list is
    /// normalized and deduplicated, keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns the first [`PollValidationError`] encountered, checking title,
    /// description, options, creator, allow-list and expiry in that order.
    pub fn validate(self, now: DateTime<Utc>) -> Result<NewPoll, PollValidationError> {
        let title = validate_title(&self.title)?;
        let description = validate_description(self.description.as_deref())?;

        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&self.options.len()) {
            return Err(PollValidationError::OptionCount {
                min: MIN_OPTIONS,
                max: MAX_OPTIONS,
                actual: self.options.len(),
            });
        }

        let options = self
            .options
            .iter()
            .enumerate()
            .map(|(index, label)| {
                let label = label.trim();
                let len = label.chars().count();
                if len == 0 || len > OPTION_MAX_LENGTH {
                    Err(PollValidationError::OptionLength {
                        position: index + 1,
                        max: OPTION_MAX_LENGTH,
                    })
                } else {
                    Ok(label.to_owned())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let creator_email = non_blank(self.created_by.as_deref())
            .map(Email::normalize)
            .transpose()
            .map_err(PollValidationError::CreatorEmail)?;

        let creator_name = non_blank(self.creator_name.as_deref()).map(str::to_owned);
        if creator_name
            .as_ref()
            .is_some_and(|name| name.chars().count() > CREATOR_NAME_MAX_LENGTH)
        {
            return Err(PollValidationError::CreatorNameTooLong {
                max: CREATOR_NAME_MAX_LENGTH,
            });
        }

        let mut valid_emails: Vec<Email> = Vec::with_capacity(self.valid_emails.len());
        for raw in &self.valid_emails {
            if raw.trim().is_empty() {
                continue;
            }
            let email =
                Email::normalize(raw).map_err(|source| PollValidationError::AllowListEmail {
                    email: raw.clone(),
                    source,
                })?;
            if !valid_emails.contains(&email) {
                valid_emails.push(email);
            }
        }

        if self.expires_at.is_some_and(|at| at <= now) {
            return Err(PollValidationError::ExpiryNotInFuture);
        }

        Ok(NewPoll {
            title,
            description,
            poll_type: self.poll_type,
            options,
            require_auth: self.require_auth,
            valid_emails,
            creator_email,
            creator_name,
            expires_at: self.expires_at,
        })
    }
}

/// Who created a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    /// Normalized email, or a synthetic `anonymous_<client id>` identifier.
    pub id: String,
    /// Display name shown next to the poll.
    pub name: String,
    /// Client (cookie session) that issued the creation request.
    pub client_id: Option<String>,
}

/// The poll currently hosted by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub require_auth: bool,
    pub valid_emails: Vec<Email>,
    pub created_by: String,
    pub creator_name: String,
    #[serde(skip)]
    pub creator_client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Poll {
    /// Open a fresh poll from a validated draft.
    #[must_use]
    pub fn open(new_poll: NewPoll, creator: Creator, now: DateTime<Utc>) -> Self {
        Self {
            id: PollId::generate(),
            title: new_poll.title,
            description: new_poll.description,
            poll_type: new_poll.poll_type,
            options: new_poll.options,
            require_auth: new_poll.require_auth,
            valid_emails: new_poll.valid_emails,
            created_by: creator.id,
            creator_name: creator.name,
            creator_client_id: creator.client_id,
            created_at: now,
            updated_at: now,
            expires_at: new_poll.expires_at,
            is_closed: false,
            closed_at: None,
        }
    }

    /// Number of options voters choose between.
    #[must_use]
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    /// Whether the expiry time has been reached.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether `email` appears on the allow-list. An empty allow-list admits
    /// everyone.
    #[must_use]
    pub fn allows(&self, email: &Email) -> bool {
        self.valid_emails.is_empty() || self.valid_emails.contains(email)
    }

    /// Whether the requester may edit this poll.
    ///
    /// A requester owns the poll when their email matches `created_by`, or
    /// when they come from the same client that created it.
    #[must_use]
    pub fn is_owned_by(&self, email: Option<&Email>, client_id: Option<&str>) -> bool {
        let by_email = email.is_some_and(|email| email.as_str() == self.created_by);
        by_email || self.is_owned_by_client(client_id)
    }

    /// Whether the requester comes from the client that created the poll.
    #[must_use]
    pub fn is_owned_by_client(&self, client_id: Option<&str>) -> bool {
        matches!(
            (self.creator_client_id.as_deref(), client_id),
            (Some(owner), Some(requester)) if owner == requester
        )
    }

    /// Merge a validated patch and bump `updated_at`.
    ///
    /// Returns the fields that actually changed.
    pub fn apply(&mut self, patch: PollPatch, now: DateTime<Utc>) -> PollChanges {
        let mut changes = PollChanges {
            updated_at: now,
            ..PollChanges::default()
        };

        if let Some(title) = patch.title {
            self.title.clone_from(&title);
            changes.title = Some(title);
        }
        if let Some(description) = patch.description {
            let description = Some(description).filter(|d| !d.is_empty());
            self.description.clone_from(&description);
            changes.description = Some(description);
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at);
            changes.expires_at = Some(expires_at);
        }
        if let Some(is_closed) = patch.is_closed {
            if is_closed != self.is_closed {
                self.closed_at = is_closed.then_some(now);
                changes.closed_at = Some(self.closed_at);
            }
            self.is_closed = is_closed;
            changes.is_closed = Some(is_closed);
        }

        self.updated_at = now;
        changes
    }
}

/// Partial update for the current poll.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_closed: Option<bool>,
}

impl PollPatch {
    /// A patch that only closes the poll.
    #[must_use]
    pub fn close() -> Self {
        Self {
            is_closed: Some(true),
            ..Self::default()
        }
    }

    /// Validate and trim the patch.
    ///
    /// # Errors
    ///
    /// Returns [`PollValidationError`] if the new title or description is out
    /// of bounds.
    pub fn validate(self) -> Result<Self, PollValidationError> {
        let title = self.title.as_deref().map(validate_title).transpose()?;
        let description = match self.description.as_deref() {
            Some(raw) => Some(validate_description(Some(raw))?.unwrap_or_default()),
            None => None,
        };

        Ok(Self {
            title,
            description,
            expires_at: self.expires_at,
            is_closed: self.is_closed,
        })
    }
}

/// Fields changed by an update, broadcast as the `pollUpdated` delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_closed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: DateTime<Utc>,
}

/// A poll together with its current vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    pub total_votes: u32,
}

fn validate_title(raw: &str) -> Result<String, PollValidationError> {
    let title = raw.trim();
    let len = title.chars().count();
    if (TITLE_MIN_LENGTH..=TITLE_MAX_LENGTH).contains(&len) {
        Ok(title.to_owned())
    } else {
        Err(PollValidationError::TitleLength {
            min: TITLE_MIN_LENGTH,
            max: TITLE_MAX_LENGTH,
        })
    }
}

fn validate_description(raw: Option<&str>) -> Result<Option<String>, PollValidationError> {
    let Some(description) = non_blank(raw) else {
        return Ok(None);
    };
    if description.chars().count() > DESCRIPTION_MAX_LENGTH {
        return Err(PollValidationError::DescriptionTooLong {
            max: DESCRIPTION_MAX_LENGTH,
        });
    }
    Ok(Some(description.to_owned()))
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}
