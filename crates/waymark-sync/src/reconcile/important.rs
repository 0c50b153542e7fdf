//! Important marker reconciliation

use waymark_core::db::ObservationRepository;
use waymark_core::models::{Important, ObservationId};

use crate::error::SyncResult;
use crate::wire::ImportantJson;

/// Merge the incoming important marker into local state.
///
/// Present remotely: upsert as synced. Absent remotely: drop the local
/// record. A marker with a pending local change (`dirty`) is left for the
/// push path in both directions.
pub fn reconcile<R: ObservationRepository>(
    repo: &R,
    observation_id: &ObservationId,
    incoming: Option<&ImportantJson>,
) -> SyncResult<()> {
    let local = repo.important(observation_id)?;
    if local.as_ref().is_some_and(|marker| marker.dirty) {
        return Ok(());
    }

    match incoming {
        Some(entry) => {
            repo.save_important(&Important::synced(
                *observation_id,
                entry.user_id.clone(),
                entry.description.clone(),
                entry.timestamp.map(|t| t.timestamp_millis()),
            ))?;
        }
        None => {
            if local.is_some() {
                repo.delete_important(observation_id)?;
            }
        }
    }
    Ok(())
}
