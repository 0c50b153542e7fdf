//! Per-record and per-sub-collection merge logic for the pull path

pub mod attachments;
pub mod favorites;
pub mod important;
pub mod observation;

pub use observation::{reconcile, Decision, SkipReason};
