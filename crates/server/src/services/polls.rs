//! Poll lifecycle service.
//!
//! Creation, lookup, partial updates (including close and reopen), deletion
//! and result queries for the single current poll. Every mutation publishes
//! its event while still holding the store lock.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use quickpoll_core::{
    Creator, Email, Poll, PollDraft, PollId, PollPatch, PollResults, PollValidationError,
    PollView, tally,
};

use crate::events::{EventBus, PollCreated, PollDeleted, PollEvent, PollUpdated};
use crate::models::ClientInfo;
use crate::services::identity::IdentityGate;
use crate::store::{PollStore, StoreError, StoreState};

/// Display name for creators who give neither a name nor an email.
const ANONYMOUS_NAME: &str = "Anonymous";

/// Errors from poll lifecycle operations.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] PollValidationError),

    #[error("this poll has expired")]
    Expired,

    #[error("this poll is closed")]
    Closed,

    #[error("only the poll creator can do that")]
    NotOwner,
}

/// Poll lifecycle service.
pub struct PollService<'a> {
    store: &'a PollStore,
    events: &'a EventBus,
    identity: &'a IdentityGate,
}

impl<'a> PollService<'a> {
    #[must_use]
    pub const fn new(
        store: &'a PollStore,
        events: &'a EventBus,
        identity: &'a IdentityGate,
    ) -> Self {
        Self {
            store,
            events,
            identity,
        }
    }

    /// Validate a draft and open it as the current poll.
    ///
    /// The creator is the draft's `createdBy` email, else the client's
    /// signed-in email, else `anonymous_<creator alias>`.
    ///
    /// # Errors
    ///
    /// Returns `PollError::Validation` for a bad draft and
    /// `StoreError::ActivePollExists` while another poll is open.
    #[instrument(skip_all, fields(client_id = %client.client_id))]
    pub fn create(
        &self,
        draft: PollDraft,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<Poll, PollError> {
        let new_poll = draft.validate(now)?;

        let creator_email = new_poll
            .creator_email
            .clone()
            .or_else(|| client.signed_in_email.clone());
        let name = new_poll
            .creator_name
            .clone()
            .or_else(|| self.signed_in_name(creator_email.as_ref(), now))
            .or_else(|| creator_email.as_ref().map(|e| e.local_part().to_owned()))
            .unwrap_or_else(|| ANONYMOUS_NAME.to_owned());
        let creator = Creator {
            id: creator_email.map_or_else(|| client.anonymous_id(), Email::into_inner),
            name,
            client_id: Some(client.client_id.clone()),
        };

        let poll = self.store.write(|state| {
            let poll = state.create(new_poll, creator, now)?.clone();
            self.events.publish(PollEvent::PollCreated(PollCreated {
                poll_id: poll.id,
                title: poll.title.clone(),
                poll_type: poll.poll_type,
            }));
            Ok::<_, PollError>(poll)
        })??;

        info!(poll_id = %poll.id, poll_type = %poll.poll_type, "Poll created");
        Ok(poll)
    }

    fn signed_in_name(&self, email: Option<&Email>, now: DateTime<Utc>) -> Option<String> {
        let email = email?;
        self.identity
            .session(email, now)
            .ok()
            .flatten()
            .map(|session| session.name)
    }

    /// The current poll with its vote count.
    ///
    /// Unless `include_closed` is set, an expired or closed poll is reported
    /// as such instead of being returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll`, `PollError::Expired` or
    /// `PollError::Closed`.
    pub fn current(
        &self,
        include_closed: bool,
        now: DateTime<Utc>,
    ) -> Result<PollView, PollError> {
        self.store.read(|state| {
            let view = view(state)?;
            if !include_closed {
                if view.poll.is_expired(now) {
                    return Err(PollError::Expired);
                }
                if view.poll.is_closed {
                    return Err(PollError::Closed);
                }
            }
            Ok(view)
        })?
    }

    /// Apply a partial update on behalf of the poll's owner.
    ///
    /// The requester owns the poll when `requested_by` or their signed-in
    /// email equals `createdBy`, or when they use the client that created it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll`, `PollError::NotOwner` or
    /// `PollError::Validation`.
    #[instrument(skip_all, fields(client_id = %client.client_id))]
    pub fn update(
        &self,
        patch: PollPatch,
        requested_by: Option<&str>,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<PollView, PollError> {
        let requested_by = requested_by.and_then(|raw| Email::normalize(raw).ok());

        let view = self.store.write(|state| {
            let poll = state.current().ok_or(StoreError::NoActivePoll)?;
            let owned = poll.is_owned_by(requested_by.as_ref(), Some(&client.client_id))
                || poll.is_owned_by(client.signed_in_email.as_ref(), None);
            if !owned {
                return Err(PollError::NotOwner);
            }

            let patch = patch.validate()?;
            let total_votes = state.vote_count();
            let (poll, changes) = state.update(patch, now)?;
            let poll = poll.clone();

            self.events.publish(PollEvent::PollUpdated(PollUpdated {
                poll_id: poll.id,
                updated_at: changes.updated_at,
                changes,
            }));
            Ok(PollView { poll, total_votes })
        })??;

        info!(poll_id = %view.poll.id, is_closed = view.poll.is_closed, "Poll updated");
        Ok(view)
    }

    /// Delete the poll and its votes. Only the creating client may do this.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll` or `PollError::NotOwner`.
    #[instrument(skip_all, fields(client_id = %client.client_id))]
    pub fn delete(&self, client: &ClientInfo) -> Result<PollId, PollError> {
        let poll_id = self.store.write(|state| {
            let poll = state.current().ok_or(StoreError::NoActivePoll)?;
            if !poll.is_owned_by_client(Some(&client.client_id)) {
                return Err(PollError::NotOwner);
            }

            let poll_id = state.delete().map(|poll| poll.id).ok_or(StoreError::NoActivePoll)?;
            self.events
                .publish(PollEvent::PollDeleted(PollDeleted { poll_id }));
            Ok(poll_id)
        })??;

        info!(poll_id = %poll_id, "Poll deleted");
        Ok(poll_id)
    }

    /// The current poll (closed or not) with its full results.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll` when there is no poll.
    pub fn results(&self) -> Result<(PollView, PollResults), PollError> {
        self.store.read(|state| {
            let view = view(state)?;
            let results = tally(&view.poll, state.votes());
            Ok((view, results))
        })?
    }
}

fn view(state: &StoreState) -> Result<PollView, PollError> {
    let poll = state.current().ok_or(StoreError::NoActivePoll)?;
    Ok(PollView {
        poll: poll.clone(),
        total_votes: state.vote_count(),
    })
}
