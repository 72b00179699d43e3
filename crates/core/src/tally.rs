//! Result aggregation.
//!
//! Everything here is a pure function of the poll and its votes: calling
//! [`tally`] twice on the same input yields the same output, and nothing is
//! cached between calls.
//!
//! - simple polls count votes per option and derive percentages
//! - rating polls average the 1-5 ratings per option and keep a histogram
//! - ranking polls award `n - position` points per ballot and order the
//!   options by their average score

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Email, Poll, PollType, Vote, VoteData};

/// Per-option tallies, shaped by poll type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Tally {
    Simple { options: Vec<SimpleOptionResult> },
    Rating { options: Vec<RatingOptionResult> },
    Ranking { options: Vec<RankingOptionResult> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleOptionResult {
    pub option: String,
    pub index: usize,
    pub votes: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingOptionResult {
    pub option: String,
    pub index: usize,
    pub average: f64,
    pub count: u32,
    pub total: u32,
    /// Number of 1, 2, 3, 4 and 5 ratings, in that order.
    pub distribution: [u32; 5],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingOptionResult {
    pub option: String,
    pub index: usize,
    pub total_score: u32,
    pub count: u32,
    pub average_position: f64,
}

/// A voter listed alongside the results of an authenticated poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterEntry {
    pub email: Option<Email>,
    pub name: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Complete results for the current poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    #[serde(flatten)]
    pub tally: Tally,
    pub total_votes: u32,
    /// Present only for polls that require sign-in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voters: Option<Vec<VoterEntry>>,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate `votes` for `poll`.
#[must_use]
pub fn tally(poll: &Poll, votes: &[Vote]) -> PollResults {
    let tally = Tally::compute(poll.poll_type, &poll.options, votes);

    let voters = poll.require_auth.then(|| {
        let mut voters: Vec<VoterEntry> = votes
            .iter()
            .map(|vote| VoterEntry {
                email: vote.voter_info.email.clone(),
                name: vote.voter_info.name.clone(),
                submitted_at: vote.voter_info.submitted_at,
            })
            .collect();
        voters.sort_by_key(|voter| voter.submitted_at);
        voters
    });

    let last_updated = votes
        .iter()
        .map(|vote| vote.created_at)
        .fold(poll.updated_at, Ord::max);

    PollResults {
        tally,
        total_votes: count(votes.len()),
        voters,
        last_updated,
    }
}

impl Tally {
    /// Aggregate votes for the given poll type and option labels.
    ///
    /// Ballots whose shape does not match `poll_type` are ignored.
    #[must_use]
    pub fn compute(poll_type: PollType, options: &[String], votes: &[Vote]) -> Self {
        match poll_type {
            PollType::Simple => Self::Simple {
                options: simple(options, votes),
            },
            PollType::Rating => Self::Rating {
                options: rating(options, votes),
            },
            PollType::Ranking => Self::Ranking {
                options: ranking(options, votes),
            },
        }
    }
}

fn simple(options: &[String], votes: &[Vote]) -> Vec<SimpleOptionResult> {
    let mut counts = vec![0u32; options.len()];
    for vote in votes {
        if let VoteData::Simple { option } = vote.vote_data
            && let Some(slot) = counts.get_mut(option)
        {
            *slot += 1;
        }
    }

    let total: u32 = counts.iter().sum();
    options
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(index, (label, votes))| SimpleOptionResult {
            option: label.clone(),
            index,
            votes,
            percentage: if total == 0 {
                0.0
            } else {
                round2(f64::from(votes) / f64::from(total) * 100.0)
            },
        })
        .collect()
}

fn rating(options: &[String], votes: &[Vote]) -> Vec<RatingOptionResult> {
    let mut results: Vec<RatingOptionResult> = options
        .iter()
        .enumerate()
        .map(|(index, label)| RatingOptionResult {
            option: label.clone(),
            index,
            average: 0.0,
            count: 0,
            total: 0,
            distribution: [0; 5],
        })
        .collect();

    for vote in votes {
        let VoteData::Rating { ratings } = &vote.vote_data else {
            continue;
        };
        for (result, &value) in results.iter_mut().zip(ratings) {
            result.total += u32::from(value);
            result.count += 1;
            if let Some(bucket) = usize::from(value)
                .checked_sub(1)
                .and_then(|i| result.distribution.get_mut(i))
            {
                *bucket += 1;
            }
        }
    }

    for result in &mut results {
        if result.count > 0 {
            result.average = round2(f64::from(result.total) / f64::from(result.count));
        }
    }
    results
}

fn ranking(options: &[String], votes: &[Vote]) -> Vec<RankingOptionResult> {
    let n = options.len();
    let mut results: Vec<RankingOptionResult> = options
        .iter()
        .enumerate()
        .map(|(index, label)| RankingOptionResult {
            option: label.clone(),
            index,
            total_score: 0,
            count: 0,
            average_position: 0.0,
        })
        .collect();

    for vote in votes {
        let VoteData::Ranking { rankings } = &vote.vote_data else {
            continue;
        };
        for (position, &option) in rankings.iter().enumerate() {
            if let Some(result) = results.get_mut(option) {
                result.total_score += count(n.saturating_sub(position));
                result.count += 1;
            }
        }
    }

    for result in &mut results {
        if result.count > 0 {
            result.average_position =
                round2(f64::from(result.total_score) / f64::from(result.count));
        }
    }

    // Stable, so tied options keep declaration order.
    results.sort_by(|a, b| b.average_position.total_cmp(&a.average_position));
    results
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
