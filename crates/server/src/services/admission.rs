//! Vote admission.
//!
//! Every ballot passes the same checks in the same order, so clients always
//! see the most fundamental problem first:
//!
//! 1. a poll exists
//! 2. it has not expired
//! 3. it is not closed
//! 4. the payload fits the poll type
//! 5. the voter is allowed to vote (sign-in polls only)
//! 6. the voter has not voted already
//!
//! The checks, the insert, the tally and both broadcasts happen under one
//! store write lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument};

use quickpoll_core::{
    Email, Poll, PollView, Vote, VoteData, VoteDataError, VoteId, VoterInfo, tally,
};

use crate::events::{EventBus, PollEvent, ResultsUpdated, VoteSubmitted};
use crate::models::ClientInfo;
use crate::services::identity::IdentityGate;
use crate::store::{PollStore, StoreError, StoreState};

/// Reasons a ballot is turned away.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("no active poll")]
    NoActivePoll,

    #[error("this poll has expired")]
    PollExpired,

    #[error("this poll is closed")]
    PollClosed,

    #[error("{0}")]
    InvalidVoteData(#[from] VoteDataError),

    #[error("this poll requires signing in with an email address")]
    AuthRequired,

    #[error("this email is not on the poll's allow-list")]
    NotAuthorized,

    #[error("you have already voted in this poll")]
    AlreadyVoted {
        vote_id: VoteId,
        submitted_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A ballot as submitted by a client.
#[derive(Debug, Clone)]
pub struct Ballot {
    pub vote_data: Value,
    pub voter_identifier: Option<String>,
    pub voter_name: Option<String>,
}

/// Answer to "may this client vote right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub has_voted: bool,
    pub is_authorized: bool,
    pub can_vote: bool,
    pub auth_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_id: Option<VoteId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Who a ballot claims to come from, resolved before taking the store lock.
struct Claimant {
    identifier: String,
    email: Result<Email, AdmissionError>,
}

impl Claimant {
    /// The duplicate-detection identifier is the given voter identifier (or
    /// the signed-in email), else the client id, else the IP address.
    fn resolve(voter_identifier: Option<&str>, client: &ClientInfo) -> Self {
        let given = voter_identifier
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let email = given
            .map(Email::normalize)
            .or_else(|| client.signed_in_email.clone().map(Ok))
            .map_or(Err(AdmissionError::AuthRequired), |parsed| {
                parsed.map_err(|_| AdmissionError::AuthRequired)
            });

        let identifier = match (given, &email) {
            (_, Ok(email)) => email.as_str().to_owned(),
            (Some(raw), Err(_)) => raw.to_owned(),
            (None, Err(_)) if !client.client_id.is_empty() => client.client_id.clone(),
            (None, Err(_)) => client.ip_address.clone().unwrap_or_default(),
        };

        Self { identifier, email }
    }

    /// Check 5: sign-in polls need an allowed email.
    fn authorize(&self, poll: &Poll) -> Result<Option<Email>, AdmissionError> {
        if !poll.require_auth {
            return Ok(self.email.as_ref().ok().cloned());
        }
        let email = self
            .email
            .as_ref()
            .map_err(|_| AdmissionError::AuthRequired)?;
        if poll.allows(email) {
            Ok(Some(email.clone()))
        } else {
            Err(AdmissionError::NotAuthorized)
        }
    }
}

/// Vote admission service.
pub struct VoteAdmission<'a> {
    store: &'a PollStore,
    events: &'a EventBus,
    identity: &'a IdentityGate,
}

impl<'a> VoteAdmission<'a> {
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

    /// Admit a ballot, store it and broadcast the new results.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as an [`AdmissionError`].
    #[instrument(skip_all, fields(client_id = %client.client_id))]
    pub fn submit(
        &self,
        ballot: Ballot,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<Vote, AdmissionError> {
        let claimant = Claimant::resolve(ballot.voter_identifier.as_deref(), client);

        // Identity lock is taken before, never inside, the store lock.
        let signed_in_name = match &claimant.email {
            Ok(email) => self
                .identity
                .session(email, now)
                .ok()
                .flatten()
                .map(|session| session.name),
            Err(_) => None,
        };
        let name = ballot
            .voter_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .or(signed_in_name);

        let vote = self.store.write(|state| {
            let (vote_data, email) = admit(state, &ballot.vote_data, &claimant, now)?;

            let voter_info = VoterInfo {
                identifier: claimant.identifier.clone(),
                email,
                name,
                session_id: Some(client.client_id.clone()),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                submitted_at: now,
            };
            let vote = state.add_vote(vote_data, voter_info, now)?.clone();
            self.broadcast(state, &vote);
            Ok::<_, AdmissionError>(vote)
        })??;

        info!(vote_id = %vote.id, "Vote accepted");
        Ok(vote)
    }

    fn broadcast(&self, state: &StoreState, vote: &Vote) {
        let Some(poll) = state.current() else {
            return;
        };
        let total_votes = state.vote_count();
        let results = tally(poll, state.votes());

        self.events.publish(PollEvent::VoteSubmitted(VoteSubmitted {
            vote_id: vote.id,
            total_votes,
            timestamp: vote.created_at,
        }));
        self.events
            .publish(PollEvent::ResultsUpdated(Box::new(ResultsUpdated {
                poll: PollView {
                    poll: poll.clone(),
                    total_votes,
                },
                results,
            })));
    }

    /// Report whether a voter could vote now, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::NoActivePoll` when there is no poll.
    pub fn status(
        &self,
        voter_identifier: Option<&str>,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<VoteStatus, AdmissionError> {
        let claimant = Claimant::resolve(voter_identifier, client);

        self.store.read(|state| {
            let poll = state.current().ok_or(AdmissionError::NoActivePoll)?;
            let existing = state.find_by_identifier(&claimant.identifier);

            let auth_error = claimant.authorize(poll).err().map(|e| e.to_string());
            let is_authorized = auth_error.is_none();
            let has_voted = existing.is_some();

            Ok::<_, AdmissionError>(VoteStatus {
                has_voted,
                is_authorized,
                can_vote: is_authorized && !has_voted && !poll.is_closed && !poll.is_expired(now),
                auth_error,
                vote_id: existing.map(|vote| vote.id),
                submitted_at: existing.map(|vote| vote.voter_info.submitted_at),
            })
        })?
    }
}

/// Checks 1 to 6, in order.
fn admit(
    state: &StoreState,
    raw: &Value,
    claimant: &Claimant,
    now: DateTime<Utc>,
) -> Result<(VoteData, Option<Email>), AdmissionError> {
    let poll = state.current().ok_or(AdmissionError::NoActivePoll)?;
    if poll.is_expired(now) {
        return Err(AdmissionError::PollExpired);
    }
    if poll.is_closed {
        return Err(AdmissionError::PollClosed);
    }

    let vote_data = VoteData::parse(poll.poll_type, poll.option_count(), raw)?;
    let email = claimant.authorize(poll)?;

    if let Some(existing) = state.find_by_identifier(&claimant.identifier) {
        return Err(AdmissionError::AlreadyVoted {
            vote_id: existing.id,
            submitted_at: existing.voter_info.submitted_at,
        });
    }

    Ok((vote_data, email))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use quickpoll_core::{Creator, PollDraft, PollPatch, PollType};

    use super::*;

    struct Fixture {
        store: PollStore,
        events: EventBus,
        identity: IdentityGate,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: PollStore::new(),
                events: EventBus::new(16),
                identity: IdentityGate::new(Duration::from_secs(86_400)),
            }
        }

        fn admission(&self) -> VoteAdmission<'_> {
            VoteAdmission::new(&self.store, &self.events, &self.identity)
        }

        fn open(
            &self,
            poll_type: PollType,
            options: &[&str],
            configure: impl FnOnce(&mut PollDraft),
        ) {
            let mut draft = PollDraft {
                title: "Admission".to_string(),
                description: None,
                poll_type,
                options: options.iter().map(ToString::to_string).collect(),
                require_auth: false,
                valid_emails: Vec::new(),
                created_by: None,
                creator_name: None,
                expires_at: None,
            };
            configure(&mut draft);
            let now = Utc::now();
            self.store
                .create(
                    draft.validate(now).unwrap(),
                    Creator {
                        id: "anonymous_owner".to_string(),
                        name: "Owner".to_string(),
                        client_id: Some("owner".to_string()),
                    },
                    now,
                )
                .unwrap();
        }
    }

    fn client(id: &str) -> ClientInfo {
        ClientInfo {
            client_id: id.to_string(),
            creator_alias: format!("alias-{id}"),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            signed_in_email: None,
        }
    }

    fn ballot(vote_data: Value, voter_identifier: Option<&str>) -> Ballot {
        Ballot {
            vote_data,
            voter_identifier: voter_identifier.map(ToString::to_string),
            voter_name: None,
        }
    }

    #[test]
    fn test_no_poll() {
        let fx = Fixture::new();
        let err = fx
            .admission()
            .submit(ballot(json!({"option": 0}), None), &client("c1"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NoActivePoll));
    }

    #[test]
    fn test_expired_checked_before_closed() {
        let fx = Fixture::new();
        let now = Utc::now();
        fx.open(PollType::Simple, &["a", "b"], |d| {
            d.expires_at = Some(now + chrono::Duration::seconds(30));
        });
        fx.store.update(PollPatch::close(), now).unwrap();

        let err = fx
            .admission()
            .submit(
                ballot(json!({"option": 0}), None),
                &client("c1"),
                now + chrono::Duration::minutes(1),
            )
            .unwrap_err();
        assert!(matches!(err, AdmissionError::PollExpired));
    }

    #[test]
    fn test_closed_poll_rejects_and_keeps_results() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |_| {});
        fx.admission()
            .submit(ballot(json!({"option": 1}), None), &client("c1"), Utc::now())
            .unwrap();
        fx.store.update(PollPatch::close(), Utc::now()).unwrap();

        let err = fx
            .admission()
            .submit(ballot(json!({"option": 0}), None), &client("c2"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AdmissionError::PollClosed));
        assert_eq!(fx.store.all_votes().unwrap().len(), 1);
    }

    #[test]
    fn test_payload_checked_before_auth() {
        let fx = Fixture::new();
        fx.open(PollType::Rating, &["a", "b"], |d| d.require_auth = true);

        let err = fx
            .admission()
            .submit(ballot(json!({"ratings": [9, 1]}), None), &client("c1"), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::InvalidVoteData(VoteDataError::RatingOutOfRange)
        ));
    }

    #[test]
    fn test_auth_required_and_allow_list() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |d| {
            d.require_auth = true;
            d.valid_emails = vec!["member@x.com".to_string()];
        });
        let admission = fx.admission();

        let err = admission
            .submit(ballot(json!({"option": 0}), None), &client("c1"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AdmissionError::AuthRequired));

        let err = admission
            .submit(
                ballot(json!({"option": 0}), Some("not-an-email")),
                &client("c1"),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AdmissionError::AuthRequired));

        let err = admission
            .submit(
                ballot(json!({"option": 0}), Some("stranger@x.com")),
                &client("c1"),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NotAuthorized));

        let vote = admission
            .submit(
                ballot(json!({"option": 0}), Some(" Member@X.com ")),
                &client("c1"),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(vote.voter_info.identifier, "member@x.com");
        assert_eq!(
            vote.voter_info.email.as_ref().map(Email::as_str),
            Some("member@x.com")
        );
    }

    #[test]
    fn test_signed_in_email_is_default_identifier() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |d| d.require_auth = true);
        let mut voter = client("c1");
        fx.identity
            .sign_in("alice@x.com", Some("Alice"), &voter, Utc::now())
            .unwrap();
        voter.signed_in_email = Some(Email::normalize("alice@x.com").unwrap());

        let vote = fx
            .admission()
            .submit(ballot(json!({"option": 1}), None), &voter, Utc::now())
            .unwrap();
        assert_eq!(vote.voter_info.name.as_deref(), Some("Alice"));
        assert_eq!(vote.voter_info.session_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_duplicate_by_identifier() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |_| {});
        let admission = fx.admission();

        let first = admission
            .submit(
                ballot(json!({"option": 0}), Some("voter@x.com")),
                &client("c1"),
                Utc::now(),
            )
            .unwrap();
        let err = admission
            .submit(
                ballot(json!({"option": 1}), Some("VOTER@x.com")),
                &client("c2"),
                Utc::now(),
            )
            .unwrap_err();

        let AdmissionError::AlreadyVoted { vote_id, .. } = err else {
            panic!("expected duplicate rejection");
        };
        assert_eq!(vote_id, first.id);
        assert_eq!(fx.store.all_votes().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_by_client_id() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |_| {});
        let admission = fx.admission();

        admission
            .submit(ballot(json!({"option": 0}), None), &client("c1"), Utc::now())
            .unwrap();
        let err = admission
            .submit(ballot(json!({"option": 0}), None), &client("c1"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AdmissionError::AlreadyVoted { .. }));
    }

    #[test]
    fn test_concurrent_duplicates_admit_one() {
        const WORKERS: usize = 32;

        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |_| {});
        let admission = fx.admission();
        let barrier = Barrier::new(WORKERS);

        let accepted = thread::scope(|scope| {
            let handles: Vec<_> = (0..WORKERS)
                .map(|i| {
                    let admission = &admission;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let mut voter = client(&format!("c{i}"));
                        voter.ip_address = Some(format!("10.0.1.{i}"));
                        barrier.wait();
                        admission
                            .submit(
                                ballot(json!({"option": i % 2}), Some("same@x.com")),
                                &voter,
                                Utc::now(),
                            )
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(accepted, 1);
        assert_eq!(fx.store.all_votes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcasts_vote_then_results() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["Yes", "No"], |_| {});
        let mut sub = fx.events.subscribe();

        let vote = fx
            .admission()
            .submit(ballot(json!({"option": 0}), None), &client("c1"), Utc::now())
            .unwrap();

        let first = sub.recv().await.unwrap();
        let PollEvent::VoteSubmitted(submitted) = first.as_ref() else {
            panic!("expected voteSubmitted first");
        };
        assert_eq!(submitted.vote_id, vote.id);
        assert_eq!(submitted.total_votes, 1);

        let second = sub.recv().await.unwrap();
        let PollEvent::ResultsUpdated(updated) = second.as_ref() else {
            panic!("expected resultsUpdated second");
        };
        assert_eq!(updated.poll.total_votes, 1);
        assert_eq!(updated.results.total_votes, 1);
    }

    #[test]
    fn test_status() {
        let fx = Fixture::new();
        fx.open(PollType::Simple, &["a", "b"], |d| {
            d.require_auth = true;
            d.valid_emails = vec!["member@x.com".to_string()];
        });
        let admission = fx.admission();

        let status = admission
            .status(Some("member@x.com"), &client("c1"), Utc::now())
            .unwrap();
        assert!(status.can_vote);
        assert!(!status.has_voted);

        let status = admission
            .status(Some("other@x.com"), &client("c2"), Utc::now())
            .unwrap();
        assert!(!status.is_authorized);
        assert!(!status.can_vote);
        assert!(status.auth_error.is_some());

        let vote = admission
            .submit(
                ballot(json!({"option": 0}), Some("member@x.com")),
                &client("c1"),
                Utc::now(),
            )
            .unwrap();
        let status = admission
            .status(Some("member@x.com"), &client("c3"), Utc::now())
            .unwrap();
        assert!(status.has_voted);
        assert!(!status.can_vote);
        assert_eq!(status.vote_id, Some(vote.id));
    }
}
