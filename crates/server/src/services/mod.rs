//! Business logic over the shared store, identity gate and event bus.

pub mod admission;
pub mod identity;
pub mod polls;

pub use admission::{AdmissionError, Ballot, VoteAdmission, VoteStatus};
pub use identity::{IdentityError, IdentityGate, SessionConflict, SignedInSession};
pub use polls::{PollError, PollService};
