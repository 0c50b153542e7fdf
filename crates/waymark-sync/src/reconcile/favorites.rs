//! Favorite set reconciliation
//!
//! Symmetric difference between the incoming favorite-user-id set and local
//! rows: missing ids are created, ids no longer present remotely are removed.
//! Rows with a pending local toggle (`dirty`) are left for the push path.

use std::collections::HashSet;

use waymark_core::db::ObservationRepository;
use waymark_core::models::{Favorite, ObservationId};

use crate::error::SyncResult;

/// Merge the incoming favorite-user-id set into local favorite rows.
pub fn reconcile<R: ObservationRepository>(
    repo: &R,
    observation_id: &ObservationId,
    incoming_user_ids: &[String],
) -> SyncResult<()> {
    let incoming: HashSet<&str> = incoming_user_ids.iter().map(String::as_str).collect();
    let local = repo.favorites(observation_id)?;

    for user_id in &incoming {
        let known = local.iter().find(|f| f.user_remote_id == *user_id);
        match known {
            Some(row) if row.dirty => {} // pending local toggle wins until pushed
            Some(row) if row.favorite => {}
            _ => repo.save_favorite(&Favorite::synced(*observation_id, *user_id))?,
        }
    }

    for row in &local {
        if !incoming.contains(row.user_remote_id.as_str()) && !row.dirty {
            repo.delete_favorite(observation_id, &row.user_remote_id)?;
        }
    }

    Ok(())
}
