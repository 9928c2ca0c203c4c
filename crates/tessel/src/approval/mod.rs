//! Deciding which tool calls need a human.
//!
//! [`ApprovalGate`] runs the checks; [`ApprovalStore`] holds what the user
//! has approved for good; [`categories`] and [`danger`] supply the built-in
//! groupings and red flags; [`diff`] renders previews for file writes.

pub mod categories;
pub mod danger;
pub mod diff;
pub mod gate;
pub mod store;

pub use categories::CategoryInfo;
pub use danger::{DangerDetector, DangerPatternConfig};
pub use gate::{
    AllowReason, ApprovalGate, ConfirmFuture, ConfirmationHandler, ConfirmationRequest,
    ConfirmationResult, GateDecision, Verdict, normalize_input,
};
pub use store::{ApprovalFile, ApprovalStore, ApprovedCategory, ApprovedPattern};
