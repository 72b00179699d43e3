//! Vote payloads and voter metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::email::Email;
use super::id::VoteId;
use super::poll::PollType;

/// Lowest accepted rating.
pub const MIN_RATING: u8 = 1;
/// Highest accepted rating.
pub const MAX_RATING: u8 = 5;

/// Reasons a vote payload does not fit the poll it targets.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteDataError {
    #[error("vote data must be a JSON object")]
    NotAnObject,

    #[error("`{field}` is required for {poll_type} polls")]
    MissingField {
        field: &'static str,
        poll_type: PollType,
    },

    #[error("`{field}` must contain only integers")]
    NotAnInteger { field: &'static str },

    #[error("`{field}` must be an array")]
    NotAnArray { field: &'static str },

    #[error("option must be between 0 and {max}")]
    OptionOutOfRange { max: usize },

    #[error("`{field}` must have exactly {expected} entries (got {actual})")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("ratings must be between 1 and 5")]
    RatingOutOfRange,

    #[error("rankings must list every option index exactly once")]
    NotAPermutation,
}

/// A validated ballot.
///
/// Serialized without a tag; the variant is implied by the poll type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteData {
    /// Index of the chosen option.
    Simple { option: usize },
    /// One rating per option, in option order.
    Rating { ratings: Vec<u8> },
    /// Option indices from most to least preferred.
    Ranking { rankings: Vec<usize> },
}

impl VoteData {
    /// Parse and validate a raw payload against a poll's type and option count.
    ///
    /// # Errors
    ///
    /// Returns [`VoteDataError`] describing the first problem found.
    pub fn parse(
        poll_type: PollType,
        option_count: usize,
        raw: &Value,
    ) -> Result<Self, VoteDataError> {
        let object = raw.as_object().ok_or(VoteDataError::NotAnObject)?;

        match poll_type {
            PollType::Simple => {
                let value = object.get("option").ok_or(VoteDataError::MissingField {
                    field: "option",
                    poll_type,
                })?;
                let option = value
                    .as_i64()
                    .ok_or(VoteDataError::NotAnInteger { field: "option" })?;
                let max = option_count.saturating_sub(1);
                let option = usize::try_from(option)
                    .ok()
                    .filter(|&o| o < option_count)
                    .ok_or(VoteDataError::OptionOutOfRange { max })?;
                Ok(Self::Simple { option })
            }
            PollType::Rating => {
                let values = integer_array(object.get("ratings"), "ratings", poll_type)?;
                check_length("ratings", option_count, values.len())?;
                let ratings = values
                    .into_iter()
                    .map(|v| {
                        u8::try_from(v)
                            .ok()
                            .filter(|r| (MIN_RATING..=MAX_RATING).contains(r))
                            .ok_or(VoteDataError::RatingOutOfRange)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Rating { ratings })
            }
            PollType::Ranking => {
                let values = integer_array(object.get("rankings"), "rankings", poll_type)?;
                check_length("rankings", option_count, values.len())?;
                let rankings = values
                    .into_iter()
                    .map(|v| usize::try_from(v).map_err(|_| VoteDataError::NotAPermutation))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut sorted = rankings.clone();
                sorted.sort_unstable();
                if sorted.iter().enumerate().any(|(i, &v)| i != v) {
                    return Err(VoteDataError::NotAPermutation);
                }
                Ok(Self::Ranking { rankings })
            }
        }
    }
}

fn integer_array(
    value: Option<&Value>,
    field: &'static str,
    poll_type: PollType,
) -> Result<Vec<i64>, VoteDataError> {
    let value = value.ok_or(VoteDataError::MissingField { field, poll_type })?;
    let items = value
        .as_array()
        .ok_or(VoteDataError::NotAnArray { field })?;
    items
        .iter()
        .map(|item| item.as_i64().ok_or(VoteDataError::NotAnInteger { field }))
        .collect()
}

const fn check_length(
    field: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), VoteDataError> {
    if expected == actual {
        Ok(())
    } else {
        Err(VoteDataError::WrongLength {
            field,
            expected,
            actual,
        })
    }
}

/// Who cast a vote and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterInfo {
    /// Duplicate-detection key: email if given, else client id, else IP.
    pub identifier: String,
    pub email: Option<Email>,
    pub name: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl VoterInfo {
    /// Whether `identifier` matches this voter on any channel.
    #[must_use]
    pub fn matches(&self, identifier: &str) -> bool {
        self.session_id.as_deref() == Some(identifier)
            || self.ip_address.as_deref() == Some(identifier)
            || self.identifier == identifier
    }
}

/// An accepted vote. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub vote_data: VoteData,
    pub voter_info: VoterInfo,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    #[must_use]
    pub fn new(vote_data: VoteData, voter_info: VoterInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: VoteId::generate(),
            vote_data,
            voter_info,
            created_at: now,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_simple() {
        let data = VoteData::parse(PollType::Simple, 2, &json!({"option": 1})).unwrap();
        assert_eq!(data, VoteData::Simple { option: 1 });
    }

    #[test]
    fn test_parse_simple_out_of_range() {
        assert_eq!(
            VoteData::parse(PollType::Simple, 2, &json!({"option": 2})).unwrap_err(),
            VoteDataError::OptionOutOfRange { max: 1 }
        );
        assert_eq!(
            VoteData::parse(PollType::Simple, 2, &json!({"option": -1})).unwrap_err(),
            VoteDataError::OptionOutOfRange { max: 1 }
        );
    }

    #[test]
    fn test_parse_simple_rejects_non_integer() {
        assert_eq!(
            VoteData::parse(PollType::Simple, 3, &json!({"option": 1.5})).unwrap_err(),
            VoteDataError::NotAnInteger { field: "option" }
        );
        assert_eq!(
            VoteData::parse(PollType::Simple, 3, &json!({"option": "1"})).unwrap_err(),
            VoteDataError::NotAnInteger { field: "option" }
        );
    }

    #[test]
    fn test_parse_wrong_shape() {
        assert_eq!(
            VoteData::parse(PollType::Simple, 2, &json!([0])).unwrap_err(),
            VoteDataError::NotAnObject
        );
        assert!(matches!(
            VoteData::parse(PollType::Rating, 2, &json!({"option": 0})),
            Err(VoteDataError::MissingField {
                field: "ratings",
                ..
            })
        ));
        assert_eq!(
            VoteData::parse(PollType::Rating, 2, &json!({"ratings": 5})).unwrap_err(),
            VoteDataError::NotAnArray { field: "ratings" }
        );
    }

    #[test]
    fn test_parse_rating() {
        let data = VoteData::parse(PollType::Rating, 3, &json!({"ratings": [1, 5, 3]})).unwrap();
        assert_eq!(
            data,
            VoteData::Rating {
                ratings: vec![1, 5, 3]
            }
        );
    }

    #[test]
    fn test_parse_rating_bounds_and_length() {
        assert_eq!(
            VoteData::parse(PollType::Rating, 2, &json!({"ratings": [0, 5]})).unwrap_err(),
            VoteDataError::RatingOutOfRange
        );
        assert_eq!(
            VoteData::parse(PollType::Rating, 2, &json!({"ratings": [6, 5]})).unwrap_err(),
            VoteDataError::RatingOutOfRange
        );
        assert_eq!(
            VoteData::parse(PollType::Rating, 3, &json!({"ratings": [4, 5]})).unwrap_err(),
            VoteDataError::WrongLength {
                field: "ratings",
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_parse_ranking() {
        let data =
            VoteData::parse(PollType::Ranking, 3, &json!({"rankings": [2, 0, 1]})).unwrap();
        assert_eq!(
            data,
            VoteData::Ranking {
                rankings: vec![2, 0, 1]
            }
        );
    }

    #[test]
    fn test_parse_ranking_requires_permutation() {
        for bad in [json!([0, 0, 1]), json!([1, 2, 3]), json!([0, -1, 2])] {
            assert_eq!(
                VoteData::parse(PollType::Ranking, 3, &json!({ "rankings": bad })).unwrap_err(),
                VoteDataError::NotAPermutation
            );
        }
    }

    #[test]
    fn test_vote_data_serializes_untagged() {
        let json = serde_json::to_value(VoteData::Simple { option: 0 }).unwrap();
        assert_eq!(json, json!({"option": 0}));
        let json = serde_json::to_value(VoteData::Ranking {
            rankings: vec![1, 0],
        })
        .unwrap();
        assert_eq!(json, json!({"rankings": [1, 0]}));
    }

    #[test]
    fn test_voter_matches_any_channel() {
        let voter = VoterInfo {
            identifier: "a@x.com".to_string(),
            email: Some(Email::normalize("a@x.com").unwrap()),
            name: None,
            session_id: Some("client-1".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            submitted_at: Utc::now(),
        };

        assert!(voter.matches("a@x.com"));
        assert!(voter.matches("client-1"));
        assert!(voter.matches("10.0.0.1"));
        assert!(!voter.matches("b@x.com"));
    }
}
