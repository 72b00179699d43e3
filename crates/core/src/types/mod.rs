//! Core types for QuickPoll.
//!
//! This module provides type-safe wrappers for the poll domain.

pub mod email;
pub mod id;
pub mod poll;
pub mod vote;

pub use email::{Email, EmailError};
pub use id::*;
pub use poll::{
    Creator, NewPoll, Poll, PollChanges, PollDraft, PollPatch, PollType, PollValidationError,
    PollView,
};
pub use vote::{Vote, VoteData, VoteDataError, VoterInfo};
