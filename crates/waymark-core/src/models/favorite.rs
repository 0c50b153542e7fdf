//! Favorite marker model

use serde::{Deserialize, Serialize};

use super::observation::ObservationId;

/// One user's favorite marker on an observation.
///
/// `favorite == false` with `dirty == true` is an un-favorite tombstone
/// awaiting its DELETE push; the row is removed once the server confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    /// Parent observation identifier.
    pub observation_id: ObservationId,
    /// Remote id of the user who favorited.
    pub user_remote_id: String,
    /// Whether the favorite is currently set.
    pub favorite: bool,
    /// Local toggle not yet pushed.
    pub dirty: bool,
}

impl Favorite {
    /// A favorite as reported by the server (already in sync).
    #[must_use]
    pub fn synced(observation_id: ObservationId, user_remote_id: impl Into<String>) -> Self {
        Self {
            observation_id,
            user_remote_id: user_remote_id.into(),
            favorite: true,
            dirty: false,
        }
    }

    /// A local toggle pending push.
    #[must_use]
    pub fn local_toggle(
        observation_id: ObservationId,
        user_remote_id: impl Into<String>,
        favorite: bool,
    ) -> Self {
        Self {
            observation_id,
            user_remote_id: user_remote_id.into(),
            favorite,
            dirty: true,
        }
    }
}
