//! Matching workflow.
//!
//! A request moves through a fixed sequence of states:
//!
//! ```text
//! Start ──analyze──▶ ProfileAnalyzed ──search──▶ CandidatesFound
//!   │                     │                            │
//!   │                     │                          rank
//!   │                     │                            ▼
//!   │                     │                         Ranked ──summarize──▶ Completed
//!   │                     │                            │
//!   └─────────────────────┴────────────────────────────┴──────────────▶ Failed
//! ```
//!
//! Summarize optionally asks the peer agent to cross-validate the top
//! recommendations. A peer that does not answer degrades the response; it
//! never fails the run. Once a run completes, [`FollowUp`] notifies the
//! peer and publishes application recommendations for job matches.

mod analyze;
mod engine;
mod followup;
mod peer;
mod state;

pub use analyze::ProfileAnalyzer;
pub use engine::{WorkflowEngine, WorkflowRun};
pub use followup::{
    application_records, ApplicationRecord, FollowUp, FollowUpReport, MatchFound, STATUS_RECOMMENDED,
};
pub use peer::{
    CoordinatorPeer, MatchValidator, PeerDelegate, ValidationReport, ValidationRequest,
    ValidationVerdict,
};
pub use state::{FailureReason, StateKind, WorkflowFailure, WorkflowState};
