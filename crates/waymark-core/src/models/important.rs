//! Important marker model

use serde::{Deserialize, Serialize};

use super::observation::ObservationId;

/// The single "important" marker an observation can carry.
///
/// `important == false` with `dirty == true` is a removal tombstone awaiting
/// its DELETE push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Important {
    /// Parent observation identifier.
    pub observation_id: ObservationId,
    /// Remote id of the user who flagged the observation.
    pub user_remote_id: Option<String>,
    /// Reason given for the flag.
    pub description: Option<String>,
    /// When the flag was set (Unix ms).
    pub timestamp: Option<i64>,
    /// Whether the marker is currently set.
    pub important: bool,
    /// Local change not yet pushed.
    pub dirty: bool,
}

impl Important {
    /// A marker as reported by the server (already in sync).
    #[must_use]
    pub fn synced(
        observation_id: ObservationId,
        user_remote_id: Option<String>,
        description: Option<String>,
        timestamp: Option<i64>,
    ) -> Self {
        Self {
            observation_id,
            user_remote_id,
            description,
            timestamp,
            important: true,
            dirty: false,
        }
    }

    /// A local flag pending push.
    #[must_use]
    pub fn local_flag(
        observation_id: ObservationId,
        user_remote_id: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            observation_id,
            user_remote_id: Some(user_remote_id.into()),
            description,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
            important: true,
            dirty: true,
        }
    }
}
