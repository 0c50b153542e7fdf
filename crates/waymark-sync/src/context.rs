//! Explicit sync scope

/// The event and acting user a sync cycle runs under.
///
/// Threaded through pull/push calls so the engine carries no ambient
/// process-wide "current event/current user" state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    /// Remote id of the event being synchronized
    pub event_remote_id: String,
    /// Remote id of the local (acting) user
    pub user_remote_id: String,
}

impl SyncContext {
    /// Create a sync context for one event/user pair
    pub fn new(event_remote_id: impl Into<String>, user_remote_id: impl Into<String>) -> Self {
        Self {
            event_remote_id: event_remote_id.into(),
            user_remote_id: user_remote_id.into(),
        }
    }
}
