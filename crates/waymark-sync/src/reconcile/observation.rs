//! Per-observation merge decision
//!
//! Given one pulled record and the current local state, decide
//! create/update/delete/skip and apply the decision immediately. Ordering of
//! the checks matters: archival is evaluated before the dirty-skip so a
//! server-side delete can never be blocked by a stale local edit, while a
//! non-archival pull never clobbers an in-flight edit.

use serde_json::Value;

use waymark_core::db::ObservationRepository;
use waymark_core::models::{Observation, ObservationId, ObservationProperties, ObservationState};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::reconcile::{attachments, favorites, important};
use crate::wire::{forms_from_wire, ObservationJson};

/// The applied merge decision for one pulled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A new local record was inserted
    Created(Observation),
    /// An existing record's content was overwritten
    Updated(Observation),
    /// The local record was physically removed (server archival)
    Deleted,
    /// Nothing was changed
    Skipped(SkipReason),
}

/// Why a record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Local record carries an unsynced edit
    DirtyLocalEdit,
    /// Incoming `lastModified` matches the stored value
    Unchanged,
    /// Remote record is archived and unknown locally
    UnknownArchived,
}

/// Reconcile one pulled record into local state.
pub fn reconcile<R: ObservationRepository>(
    repo: &R,
    ctx: &SyncContext,
    value: &Value,
) -> SyncResult<Decision> {
    let remote = ObservationJson::decode(value)?;
    let state = remote.observation_state()?;
    let local = repo.find_by_remote_id(&remote.id)?;

    match (state, local) {
        // Server delete always wins, even over dirty
        (ObservationState::Archived, Some(local)) => {
            repo.delete(&local.id)?;
            tracing::debug!(remote_id = %remote.id, "removed archived observation");
            Ok(Decision::Deleted)
        }
        (_, Some(local)) if local.dirty => Ok(Decision::Skipped(SkipReason::DirtyLocalEdit)),
        (_, Some(local)) if local.last_modified == remote.last_modified_millis() => {
            Ok(Decision::Skipped(SkipReason::Unchanged))
        }
        (_, Some(mut local)) => {
            apply_content(&mut local, &remote)?;
            repo.save(&local)?;
            reconcile_owned(repo, &local.id, &remote)?;
            Ok(Decision::Updated(local))
        }
        (ObservationState::Active, None) => {
            let observation = from_remote(ctx, &remote)?;
            repo.insert(&observation)?;
            reconcile_owned(repo, &observation.id, &remote)?;
            Ok(Decision::Created(observation))
        }
        (ObservationState::Archived, None) => Ok(Decision::Skipped(SkipReason::UnknownArchived)),
    }
}

/// Overwrite content fields from the remote record.
fn apply_content(local: &mut Observation, remote: &ObservationJson) -> SyncResult<()> {
    local.geometry = remote.geometry()?;
    local.properties = ObservationProperties {
        timestamp: remote.timestamp_millis(),
        forms: forms_from_wire(&remote.properties.forms)?,
    };
    local.timestamp = remote.timestamp_millis();
    local.last_modified = remote.last_modified_millis();
    local.state = remote.observation_state()?;
    if local.user_remote_id.is_none() {
        local.user_remote_id = remote.user_id.clone();
    }
    if local.remote_url.is_none() {
        local.remote_url = remote.url.clone();
    }
    Ok(())
}

/// Build a fresh local record from a remote one.
fn from_remote(ctx: &SyncContext, remote: &ObservationJson) -> SyncResult<Observation> {
    Ok(Observation {
        id: ObservationId::new(),
        remote_id: Some(remote.id.clone()),
        remote_url: remote.url.clone(),
        event_remote_id: ctx.event_remote_id.clone(),
        user_remote_id: remote.user_id.clone(),
        geometry: remote.geometry()?,
        properties: ObservationProperties {
            timestamp: remote.timestamp_millis(),
            forms: forms_from_wire(&remote.properties.forms)?,
        },
        timestamp: remote.timestamp_millis(),
        last_modified: remote.last_modified_millis(),
        dirty: false,
        syncing: false,
        state: ObservationState::Active,
        error: None,
    })
}

/// Run the three sub-collection reconcilers against the same record.
fn reconcile_owned<R: ObservationRepository>(
    repo: &R,
    id: &ObservationId,
    remote: &ObservationJson,
) -> SyncResult<()> {
    let observation = repo
        .get(id)?
        .ok_or_else(|| waymark_core::Error::NotFound(id.to_string()))?;
    attachments::reconcile(repo, &observation, &remote.attachments)?;
    favorites::reconcile(repo, id, &remote.properties.favorite_user_ids)?;
    important::reconcile(repo, id, remote.properties.important.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waymark_core::db::{Database, SqliteObservationRepository};
    use waymark_core::Geometry;

    fn ctx() -> SyncContext {
        SyncContext::new("event-7", "user-1")
    }

    fn remote(id: &str, last_modified: &str, state: &str) -> Value {
        json!({
            "id": id,
            "lastModified": last_modified,
            "url": format!("https://s/api/events/7/observations/{id}"),
            "state": {"name": state},
            "geometry": {"type": "Point", "coordinates": [-104.8, 39.6]},
            "userId": "user-2",
            "properties": {
                "timestamp": "2024-03-01T09:00:00.000Z",
                "forms": [{"formId": "42", "weather": "clear"}],
                "favoriteUserIds": ["user-3"]
            },
            "attachments": [{"id": "900", "contentType": "image/jpeg", "name": "photo.jpg"}]
        })
    }

    #[test]
    fn test_create_from_remote() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        let decision = reconcile(&repo, &ctx(), &remote("obs-1", "2024-03-01T10:00:00.000Z", "active"))
            .unwrap();

        let Decision::Created(observation) = decision else {
            panic!("expected Created, got {decision:?}");
        };
        assert_eq!(observation.remote_id.as_deref(), Some("obs-1"));
        assert!(!observation.dirty);
        assert_eq!(observation.event_remote_id, "event-7");

        // Sub-collections landed with the record
        assert_eq!(repo.attachments(&observation.id).unwrap().len(), 1);
        assert_eq!(repo.favorites(&observation.id).unwrap().len(), 1);
        assert!(repo.important(&observation.id).unwrap().is_none());
    }

    #[test]
    fn test_update_when_last_modified_differs() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        reconcile(&repo, &ctx(), &remote("obs-1", "2024-03-01T10:00:00.000Z", "active")).unwrap();

        let mut newer = remote("obs-1", "2024-03-01T11:00:00.000Z", "active");
        newer["geometry"] = json!({"type": "Point", "coordinates": [1.0, 1.0]});
        let decision = reconcile(&repo, &ctx(), &newer).unwrap();

        let Decision::Updated(observation) = decision else {
            panic!("expected Updated, got {decision:?}");
        };
        assert_eq!(
            observation.geometry,
            Geometry::from_wire(&json!({"type": "Point", "coordinates": [1.0, 1.0]})).unwrap()
        );
    }

    #[test]
    fn test_skip_when_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        let payload = remote("obs-1", "2024-03-01T10:00:00.000Z", "active");
        reconcile(&repo, &ctx(), &payload).unwrap();

        let decision = reconcile(&repo, &ctx(), &payload).unwrap();
        assert_eq!(decision, Decision::Skipped(SkipReason::Unchanged));
    }

    #[test]
    fn test_dirty_local_edit_is_preserved() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        reconcile(&repo, &ctx(), &remote("obs-1", "2024-03-01T10:00:00.000Z", "active")).unwrap();

        let mut local = repo.find_by_remote_id("obs-1").unwrap().unwrap();
        local.dirty = true;
        repo.save(&local).unwrap();

        let newer = remote("obs-1", "2024-03-01T11:00:00.000Z", "active");
        let decision = reconcile(&repo, &ctx(), &newer).unwrap();
        assert_eq!(decision, Decision::Skipped(SkipReason::DirtyLocalEdit));

        // Content and watermark untouched
        let unchanged = repo.find_by_remote_id("obs-1").unwrap().unwrap();
        assert_eq!(unchanged.last_modified, local.last_modified);
    }

    #[test]
    fn test_archival_wins_over_dirty() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        reconcile(&repo, &ctx(), &remote("obs-1", "2024-03-01T10:00:00.000Z", "active")).unwrap();
        let mut local = repo.find_by_remote_id("obs-1").unwrap().unwrap();
        local.dirty = true;
        repo.save(&local).unwrap();

        let archived = remote("obs-1", "2024-03-01T11:00:00.000Z", "archive");
        let decision = reconcile(&repo, &ctx(), &archived).unwrap();
        assert_eq!(decision, Decision::Deleted);
        assert!(repo.find_by_remote_id("obs-1").unwrap().is_none());
    }

    #[test]
    fn test_unknown_archived_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        let archived = remote("obs-9", "2024-03-01T10:00:00.000Z", "archive");
        let decision = reconcile(&repo, &ctx(), &archived).unwrap();
        assert_eq!(decision, Decision::Skipped(SkipReason::UnknownArchived));
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteObservationRepository::new(db.connection());

        let result = reconcile(&repo, &ctx(), &json!({"id": "obs-1"}));
        assert!(result.is_err());
    }
}
