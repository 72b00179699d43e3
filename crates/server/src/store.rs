//! In-memory poll store.
//!
//! Holds at most one poll plus the votes cast on it. State is volatile and
//! lives for the lifetime of the process.
//!
//! All access goes through [`PollStore::read`] and [`PollStore::write`], which
//! run a closure under a `std::sync::RwLock`. Callers that need several steps
//! to happen atomically (check, insert, tally, publish) do all of them inside
//! one `write` closure. Never hold the lock across an `.await`.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use quickpoll_core::{
    Creator, NewPoll, Poll, PollChanges, PollPatch, Vote, VoteData, VoteId, VoterInfo,
};

/// Errors raised by the poll store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("an active poll already exists; close it before creating a new one")]
    ActivePollExists,

    #[error("no active poll")]
    NoActivePoll,

    #[error("poll is closed")]
    PollClosed,

    #[error("poll store lock poisoned")]
    Poisoned,
}

/// The poll and its votes.
#[derive(Debug, Default)]
pub struct StoreState {
    current: Option<Poll>,
    votes: Vec<Vote>,
}

impl StoreState {
    /// The current poll, closed or not.
    #[must_use]
    pub const fn current(&self) -> Option<&Poll> {
        self.current.as_ref()
    }

    /// Store a new poll, discarding any closed predecessor and its votes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ActivePollExists` if the current poll is still open.
    pub fn create(
        &mut self,
        new_poll: NewPoll,
        creator: Creator,
        now: DateTime<Utc>,
    ) -> Result<&Poll, StoreError> {
        if self.current.as_ref().is_some_and(|poll| !poll.is_closed) {
            return Err(StoreError::ActivePollExists);
        }

        self.votes.clear();
        Ok(&*self.current.insert(Poll::open(new_poll, creator, now)))
    }

    /// Apply a validated patch to the current poll.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll` if there is no poll.
    pub fn update(
        &mut self,
        patch: PollPatch,
        now: DateTime<Utc>,
    ) -> Result<(&Poll, PollChanges), StoreError> {
        let poll = self.current.as_mut().ok_or(StoreError::NoActivePoll)?;
        let changes = poll.apply(patch, now);
        Ok((&*poll, changes))
    }

    /// Remove the poll and all its votes, returning the removed poll.
    pub fn delete(&mut self) -> Option<Poll> {
        self.votes.clear();
        self.current.take()
    }

    /// Record a vote on the current poll.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll` or `StoreError::PollClosed`.
    pub fn add_vote(
        &mut self,
        vote_data: VoteData,
        voter_info: VoterInfo,
        now: DateTime<Utc>,
    ) -> Result<&Vote, StoreError> {
        match &self.current {
            None => return Err(StoreError::NoActivePoll),
            Some(poll) if poll.is_closed => return Err(StoreError::PollClosed),
            Some(_) => {}
        }

        self.votes.push(Vote::new(vote_data, voter_info, now));
        self.votes.last().ok_or(StoreError::NoActivePoll)
    }

    /// Votes on the current poll, in submission order.
    #[must_use]
    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    #[must_use]
    pub fn vote_count(&self) -> u32 {
        u32::try_from(self.votes.len()).unwrap_or(u32::MAX)
    }

    /// First vote whose client id, IP address or voter identifier equals
    /// `identifier`.
    #[must_use]
    pub fn find_by_identifier(&self, identifier: &str) -> Option<&Vote> {
        self.votes
            .iter()
            .find(|vote| vote.voter_info.matches(identifier))
    }

    /// Remove a single vote. Returns whether it existed.
    pub fn delete_vote(&mut self, id: VoteId) -> bool {
        let before = self.votes.len();
        self.votes.retain(|vote| vote.id != id);
        self.votes.len() != before
    }
}

/// Shared handle to the store state.
#[derive(Clone, Default)]
pub struct PollStore {
    inner: Arc<RwLock<StoreState>>,
}

impl PollStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with shared access to the state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if a writer panicked.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> Result<R, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access to the state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if a writer panicked.
    pub fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Result<R, StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut guard))
    }

    /// Clone of the current poll, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn get(&self) -> Result<Option<Poll>, StoreError> {
        self.read(|state| state.current().cloned())
    }

    /// See [`StoreState::create`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ActivePollExists` or `StoreError::Poisoned`.
    pub fn create(
        &self,
        new_poll: NewPoll,
        creator: Creator,
        now: DateTime<Utc>,
    ) -> Result<Poll, StoreError> {
        self.write(|state| state.create(new_poll, creator, now).cloned())?
    }

    /// See [`StoreState::update`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll` or `StoreError::Poisoned`.
    pub fn update(
        &self,
        patch: PollPatch,
        now: DateTime<Utc>,
    ) -> Result<(Poll, PollChanges), StoreError> {
        self.write(|state| {
            state
                .update(patch, now)
                .map(|(poll, changes)| (poll.clone(), changes))
        })?
    }

    /// Remove the poll and its votes. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn delete(&self) -> Result<bool, StoreError> {
        self.write(|state| state.delete().is_some())
    }

    /// Reset to the empty state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.write(|state| *state = StoreState::default())
    }

    /// See [`StoreState::add_vote`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoActivePoll`, `StoreError::PollClosed` or
    /// `StoreError::Poisoned`.
    pub fn add_vote(
        &self,
        vote_data: VoteData,
        voter_info: VoterInfo,
        now: DateTime<Utc>,
    ) -> Result<Vote, StoreError> {
        self.write(|state| state.add_vote(vote_data, voter_info, now).cloned())?
    }

    /// Snapshot of every vote on the current poll.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn all_votes(&self) -> Result<Vec<Vote>, StoreError> {
        self.read(|state| state.votes().to_vec())
    }

    /// See [`StoreState::find_by_identifier`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn find_by_identifier(&self, identifier: &str) -> Result<Option<Vote>, StoreError> {
        self.read(|state| state.find_by_identifier(identifier).cloned())
    }

    /// See [`StoreState::delete_vote`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn delete_vote(&self, id: VoteId) -> Result<bool, StoreError> {
        self.write(|state| state.delete_vote(id))
    }

    /// Whether the lock is usable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.inner.is_poisoned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use quickpoll_core::{PollDraft, PollType};

    use super::*;

    fn new_poll(title: &str) -> NewPoll {
        PollDraft {
            title: title.to_string(),
            description: None,
            poll_type: PollType::Simple,
            options: vec!["Yes".to_string(), "No".to_string()],
            require_auth: false,
            valid_emails: Vec::new(),
            created_by: None,
            creator_name: None,
            expires_at: None,
        }
        .validate(Utc::now())
        .unwrap()
    }

    fn creator() -> Creator {
        Creator {
            id: "anonymous_client-1".to_string(),
            name: "Anonymous".to_string(),
            client_id: Some("client-1".to_string()),
        }
    }

    fn voter(identifier: &str, session: &str, ip: &str) -> VoterInfo {
        VoterInfo {
            identifier: identifier.to_string(),
            email: None,
            name: None,
            session_id: Some(session.to_string()),
            ip_address: Some(ip.to_string()),
            user_agent: None,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = PollStore::new();
        assert!(store.get().unwrap().is_none());

        let poll = store.create(new_poll("First"), creator(), Utc::now()).unwrap();
        assert_eq!(store.get().unwrap().unwrap().id, poll.id);
    }

    #[test]
    fn test_create_rejects_while_open() {
        let store = PollStore::new();
        let first = store.create(new_poll("First"), creator(), Utc::now()).unwrap();

        let err = store
            .create(new_poll("Second"), creator(), Utc::now())
            .unwrap_err();
        assert_eq!(err, StoreError::ActivePollExists);
        assert_eq!(store.get().unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_create_replaces_closed_poll_and_votes() {
        let store = PollStore::new();
        store.create(new_poll("First"), creator(), Utc::now()).unwrap();
        store
            .add_vote(
                VoteData::Simple { option: 0 },
                voter("a", "s1", "1.1.1.1"),
                Utc::now(),
            )
            .unwrap();
        store.update(PollPatch::close(), Utc::now()).unwrap();

        let second = store.create(new_poll("Second"), creator(), Utc::now()).unwrap();
        assert_eq!(second.title, "Second");
        assert!(store.all_votes().unwrap().is_empty());
    }

    #[test]
    fn test_update_without_poll() {
        let store = PollStore::new();
        assert_eq!(
            store.update(PollPatch::close(), Utc::now()).unwrap_err(),
            StoreError::NoActivePoll
        );
    }

    #[test]
    fn test_close_preserves_votes_and_blocks_new_ones() {
        let store = PollStore::new();
        store.create(new_poll("First"), creator(), Utc::now()).unwrap();
        store
            .add_vote(
                VoteData::Simple { option: 1 },
                voter("a", "s1", "1.1.1.1"),
                Utc::now(),
            )
            .unwrap();

        let (poll, changes) = store.update(PollPatch::close(), Utc::now()).unwrap();
        assert!(poll.is_closed);
        assert_eq!(changes.is_closed, Some(true));
        assert_eq!(store.all_votes().unwrap().len(), 1);

        let err = store
            .add_vote(
                VoteData::Simple { option: 0 },
                voter("b", "s2", "2.2.2.2"),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, StoreError::PollClosed);
    }

    #[test]
    fn test_add_vote_without_poll() {
        let store = PollStore::new();
        let err = store
            .add_vote(
                VoteData::Simple { option: 0 },
                voter("a", "s1", "1.1.1.1"),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, StoreError::NoActivePoll);
    }

    #[test]
    fn test_find_by_identifier_matches_any_channel() {
        let store = PollStore::new();
        store.create(new_poll("First"), creator(), Utc::now()).unwrap();
        let vote = store
            .add_vote(
                VoteData::Simple { option: 0 },
                voter("a@x.com", "s1", "1.1.1.1"),
                Utc::now(),
            )
            .unwrap();

        for key in ["a@x.com", "s1", "1.1.1.1"] {
            assert_eq!(store.find_by_identifier(key).unwrap().unwrap().id, vote.id);
        }
        assert!(store.find_by_identifier("other").unwrap().is_none());
    }

    #[test]
    fn test_delete_vote() {
        let store = PollStore::new();
        store.create(new_poll("First"), creator(), Utc::now()).unwrap();
        let vote = store
            .add_vote(
                VoteData::Simple { option: 0 },
                voter("a", "s1", "1.1.1.1"),
                Utc::now(),
            )
            .unwrap();

        assert!(store.delete_vote(vote.id).unwrap());
        assert!(!store.delete_vote(vote.id).unwrap());
        assert_eq!(store.read(StoreState::vote_count).unwrap(), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = PollStore::new();
        assert!(!store.delete().unwrap());

        store.create(new_poll("First"), creator(), Utc::now()).unwrap();
        assert!(store.delete().unwrap());
        assert!(store.get().unwrap().is_none());

        store.create(new_poll("Again"), creator(), Utc::now()).unwrap();
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
        assert!(store.is_healthy());
    }
}
