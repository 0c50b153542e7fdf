//! Observation repository implementation

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::models::{
    Attachment, AttachmentId, Favorite, Important, Observation, ObservationId, ObservationState,
    PushError,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for observation storage operations
///
/// This is the storage contract the sync engine works against. One writer
/// context per transactional unit; `in_transaction` scopes a chunk of
/// mutations that commit or roll back together.
pub trait ObservationRepository {
    /// Get an observation by local ID
    fn get(&self, id: &ObservationId) -> Result<Option<Observation>>;

    /// Find an observation by its server-assigned ID
    fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Observation>>;

    /// Insert a new observation
    fn insert(&self, observation: &Observation) -> Result<()>;

    /// Persist all fields of an existing observation
    fn save(&self, observation: &Observation) -> Result<()>;

    /// Physically remove an observation and its owned records
    fn delete(&self, id: &ObservationId) -> Result<()>;

    /// List observations with unsynced local edits, oldest first
    fn list_dirty(&self, event_remote_id: &str) -> Result<Vec<Observation>>;

    /// Newest server-asserted modification time for an event, excluding the
    /// given (local) user's own records
    fn watermark(&self, event_remote_id: &str, excluding_user: &str) -> Result<Option<i64>>;

    /// Atomically set `syncing` for a record iff no push is already in flight;
    /// returns false when one is
    fn try_begin_sync(&self, id: &ObservationId) -> Result<bool>;

    /// Clear `syncing` and store (or clear) the push error
    fn finish_sync(&self, id: &ObservationId, error: Option<&PushError>) -> Result<()>;

    /// Clear `syncing` only, leaving any recorded error untouched
    /// (transient failures mutate no other local state)
    fn abort_sync(&self, id: &ObservationId) -> Result<()>;

    /// Record a successful content push: clear `dirty`/`syncing`/`error` and
    /// store the server modification time, but only when the stored content
    /// still matches `pushed`. An edit that landed while the push was in
    /// flight stays dirty; only the flags and `last_modified` are updated.
    fn complete_push(&self, pushed: &Observation, last_modified: Option<i64>) -> Result<()>;

    /// Assign the server identity exactly once; errors if already assigned
    fn stamp_remote_identity(
        &self,
        id: &ObservationId,
        remote_id: &str,
        remote_url: &str,
    ) -> Result<()>;

    /// Attachments owned by an observation
    fn attachments(&self, id: &ObservationId) -> Result<Vec<Attachment>>;

    /// Insert or update an attachment
    fn save_attachment(&self, attachment: &Attachment) -> Result<()>;

    /// Physically remove an attachment
    fn delete_attachment(&self, id: &AttachmentId) -> Result<()>;

    /// Favorite markers on an observation
    fn favorites(&self, id: &ObservationId) -> Result<Vec<Favorite>>;

    /// Insert or update a favorite marker
    fn save_favorite(&self, favorite: &Favorite) -> Result<()>;

    /// Remove a favorite marker
    fn delete_favorite(&self, id: &ObservationId, user_remote_id: &str) -> Result<()>;

    /// The important marker on an observation, if any
    fn important(&self, id: &ObservationId) -> Result<Option<Important>>;

    /// Insert or update the important marker
    fn save_important(&self, important: &Important) -> Result<()>;

    /// Remove the important marker
    fn delete_important(&self, id: &ObservationId) -> Result<()>;

    /// Run `f` inside a single transaction: commit on `Ok`, roll back on `Err`
    fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>;
}

/// `SQLite` implementation of `ObservationRepository`
pub struct SqliteObservationRepository<'a> {
    conn: &'a Connection,
}

const OBSERVATION_COLUMNS: &str = "id, remote_id, remote_url, event_remote_id, user_remote_id, \
     geometry, properties, timestamp, last_modified, dirty, syncing, state, error";

impl<'a> SqliteObservationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a stored id column, surfacing corruption instead of masking it
    fn parse_id<T>(raw: &str, column: usize) -> rusqlite::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        raw.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
    }

    /// Parse an observation from a database row
    fn parse_observation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Observation> {
        let id: String = row.get(0)?;
        let geometry_blob: Vec<u8> = row.get(5)?;
        let geometry = Geometry::from_blob(&geometry_blob)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Blob, Box::new(e)))?;
        let properties_json: String = row.get(6)?;
        let properties = serde_json::from_str(&properties_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
        let state: String = row.get(11)?;
        let error_json: Option<String> = row.get(12)?;
        let error = error_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?;

        Ok(Observation {
            id: Self::parse_id(&id, 0)?,
            remote_id: row.get(1)?,
            remote_url: row.get(2)?,
            event_remote_id: row.get(3)?,
            user_remote_id: row.get(4)?,
            geometry,
            properties,
            timestamp: row.get(7)?,
            last_modified: row.get(8)?,
            dirty: row.get::<_, i32>(9)? != 0,
            syncing: row.get::<_, i32>(10)? != 0,
            state: ObservationState::from_wire_name(&state).unwrap_or(ObservationState::Active),
            error,
        })
    }

    /// Parse an attachment from a database row
    fn parse_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Attachment> {
        let id: String = row.get(0)?;
        let observation_id: String = row.get(1)?;
        Ok(Attachment {
            id: Self::parse_id(&id, 0)?,
            observation_id: Self::parse_id(&observation_id, 1)?,
            remote_id: row.get(2)?,
            observation_form_id: row.get(3)?,
            field_name: row.get(4)?,
            content_type: row.get(5)?,
            name: row.get(6)?,
            size: row.get(7)?,
            url: row.get(8)?,
            remote_path: row.get(9)?,
            local_path: row.get(10)?,
            dirty: row.get::<_, i32>(11)? != 0,
            marked_for_deletion: row.get::<_, i32>(12)? != 0,
        })
    }

    fn parse_favorite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Favorite> {
        let observation_id: String = row.get(0)?;
        Ok(Favorite {
            observation_id: Self::parse_id(&observation_id, 0)?,
            user_remote_id: row.get(1)?,
            favorite: row.get::<_, i32>(2)? != 0,
            dirty: row.get::<_, i32>(3)? != 0,
        })
    }

    fn parse_important(row: &rusqlite::Row<'_>) -> rusqlite::Result<Important> {
        let observation_id: String = row.get(0)?;
        Ok(Important {
            observation_id: Self::parse_id(&observation_id, 0)?,
            user_remote_id: row.get(1)?,
            description: row.get(2)?,
            timestamp: row.get(3)?,
            important: row.get::<_, i32>(4)? != 0,
            dirty: row.get::<_, i32>(5)? != 0,
        })
    }

    fn observation_params(observation: &Observation) -> Result<ObservationRow> {
        Ok(ObservationRow {
            geometry: observation.geometry.to_blob()?,
            properties: serde_json::to_string(&observation.properties)?,
            error: observation
                .error
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

/// Serialized column values derived from an observation
struct ObservationRow {
    geometry: Vec<u8>,
    properties: String,
    error: Option<String>,
}

impl ObservationRepository for SqliteObservationRepository<'_> {
    fn get(&self, id: &ObservationId) -> Result<Option<Observation>> {
        let sql = format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?");
        let observation = self
            .conn
            .query_row(&sql, params![id.as_str()], Self::parse_observation)
            .optional()?;
        Ok(observation)
    }

    fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Observation>> {
        let sql = format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE remote_id = ?");
        let observation = self
            .conn
            .query_row(&sql, params![remote_id], Self::parse_observation)
            .optional()?;
        Ok(observation)
    }

    fn insert(&self, observation: &Observation) -> Result<()> {
        let row = Self::observation_params(observation)?;
        self.conn.execute(
            "INSERT INTO observations (id, remote_id, remote_url, event_remote_id, \
             user_remote_id, geometry, properties, timestamp, last_modified, dirty, syncing, \
             state, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                observation.id.as_str(),
                observation.remote_id,
                observation.remote_url,
                observation.event_remote_id,
                observation.user_remote_id,
                row.geometry,
                row.properties,
                observation.timestamp,
                observation.last_modified,
                i32::from(observation.dirty),
                i32::from(observation.syncing),
                observation.state.wire_name(),
                row.error,
            ],
        )?;
        Ok(())
    }

    fn save(&self, observation: &Observation) -> Result<()> {
        let row = Self::observation_params(observation)?;
        let rows = self.conn.execute(
            "UPDATE observations SET remote_id = ?, remote_url = ?, event_remote_id = ?, \
             user_remote_id = ?, geometry = ?, properties = ?, timestamp = ?, last_modified = ?, \
             dirty = ?, syncing = ?, state = ?, error = ? WHERE id = ?",
            params![
                observation.remote_id,
                observation.remote_url,
                observation.event_remote_id,
                observation.user_remote_id,
                row.geometry,
                row.properties,
                observation.timestamp,
                observation.last_modified,
                i32::from(observation.dirty),
                i32::from(observation.syncing),
                observation.state.wire_name(),
                row.error,
                observation.id.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(observation.id.to_string()));
        }
        Ok(())
    }

    fn delete(&self, id: &ObservationId) -> Result<()> {
        // Owned attachments/favorites/important cascade via foreign keys
        let rows = self
            .conn
            .execute("DELETE FROM observations WHERE id = ?", params![id.as_str()])?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn list_dirty(&self, event_remote_id: &str) -> Result<Vec<Observation>> {
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations \
             WHERE event_remote_id = ? AND dirty = 1 AND syncing = 0 \
             ORDER BY timestamp ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let observations = stmt
            .query_map(params![event_remote_id], Self::parse_observation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(observations)
    }

    fn watermark(&self, event_remote_id: &str, excluding_user: &str) -> Result<Option<i64>> {
        let watermark: Option<i64> = self.conn.query_row(
            "SELECT MAX(last_modified) FROM observations \
             WHERE event_remote_id = ? AND remote_id IS NOT NULL \
             AND (user_remote_id IS NULL OR user_remote_id != ?)",
            params![event_remote_id, excluding_user],
            |row| row.get(0),
        )?;
        Ok(watermark)
    }

    fn try_begin_sync(&self, id: &ObservationId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE observations SET syncing = 1 WHERE id = ? AND syncing = 0",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn finish_sync(&self, id: &ObservationId, error: Option<&PushError>) -> Result<()> {
        let error_json = error.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE observations SET syncing = 0, error = ? WHERE id = ?",
            params![error_json, id.as_str()],
        )?;
        Ok(())
    }

    fn abort_sync(&self, id: &ObservationId) -> Result<()> {
        self.conn.execute(
            "UPDATE observations SET syncing = 0 WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn complete_push(&self, pushed: &Observation, last_modified: Option<i64>) -> Result<()> {
        let row = Self::observation_params(pushed)?;
        let rows = self.conn.execute(
            "UPDATE observations SET dirty = 0, syncing = 0, error = NULL, \
             last_modified = COALESCE(?, last_modified) \
             WHERE id = ? AND geometry = ? AND properties = ? AND timestamp = ? AND state = ?",
            params![
                last_modified,
                pushed.id.as_str(),
                row.geometry,
                row.properties,
                pushed.timestamp,
                pushed.state.wire_name(),
            ],
        )?;

        if rows == 0 {
            // Content changed while the push was in flight; the edit stays
            // dirty and will push again
            let updated = self.conn.execute(
                "UPDATE observations SET syncing = 0, error = NULL, \
                 last_modified = COALESCE(?, last_modified) WHERE id = ?",
                params![last_modified, pushed.id.as_str()],
            )?;
            if updated == 0 {
                return Err(Error::NotFound(pushed.id.to_string()));
            }
        }
        Ok(())
    }

    fn stamp_remote_identity(
        &self,
        id: &ObservationId,
        remote_id: &str,
        remote_url: &str,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE observations SET remote_id = ?, remote_url = ? \
             WHERE id = ? AND remote_id IS NULL",
            params![remote_id, remote_url, id.as_str()],
        )?;

        if rows == 0 {
            return match self.get(id)? {
                Some(_) => Err(Error::InvalidInput(format!(
                    "Observation {id} already has a remote id"
                ))),
                None => Err(Error::NotFound(id.to_string())),
            };
        }
        Ok(())
    }

    fn attachments(&self, id: &ObservationId) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, observation_id, remote_id, observation_form_id, field_name, \
             content_type, name, size, url, remote_path, local_path, dirty, \
             marked_for_deletion FROM attachments WHERE observation_id = ?",
        )?;
        let attachments = stmt
            .query_map(params![id.as_str()], Self::parse_attachment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }

    fn save_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.conn.execute(
            "INSERT INTO attachments (id, observation_id, remote_id, observation_form_id, \
             field_name, content_type, name, size, url, remote_path, local_path, dirty, \
             marked_for_deletion) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET remote_id = excluded.remote_id, \
             observation_form_id = excluded.observation_form_id, \
             field_name = excluded.field_name, content_type = excluded.content_type, \
             name = excluded.name, size = excluded.size, url = excluded.url, \
             remote_path = excluded.remote_path, local_path = excluded.local_path, \
             dirty = excluded.dirty, marked_for_deletion = excluded.marked_for_deletion",
            params![
                attachment.id.as_str(),
                attachment.observation_id.as_str(),
                attachment.remote_id,
                attachment.observation_form_id,
                attachment.field_name,
                attachment.content_type,
                attachment.name,
                attachment.size,
                attachment.url,
                attachment.remote_path,
                attachment.local_path,
                i32::from(attachment.dirty),
                i32::from(attachment.marked_for_deletion),
            ],
        )?;
        Ok(())
    }

    fn delete_attachment(&self, id: &AttachmentId) -> Result<()> {
        self.conn
            .execute("DELETE FROM attachments WHERE id = ?", params![id.as_str()])?;
        Ok(())
    }

    fn favorites(&self, id: &ObservationId) -> Result<Vec<Favorite>> {
        let mut stmt = self.conn.prepare(
            "SELECT observation_id, user_remote_id, favorite, dirty \
             FROM observation_favorites WHERE observation_id = ?",
        )?;
        let favorites = stmt
            .query_map(params![id.as_str()], Self::parse_favorite)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(favorites)
    }

    fn save_favorite(&self, favorite: &Favorite) -> Result<()> {
        self.conn.execute(
            "INSERT INTO observation_favorites (observation_id, user_remote_id, favorite, dirty) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(observation_id, user_remote_id) DO UPDATE SET \
             favorite = excluded.favorite, dirty = excluded.dirty",
            params![
                favorite.observation_id.as_str(),
                favorite.user_remote_id,
                i32::from(favorite.favorite),
                i32::from(favorite.dirty),
            ],
        )?;
        Ok(())
    }

    fn delete_favorite(&self, id: &ObservationId, user_remote_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM observation_favorites WHERE observation_id = ? AND user_remote_id = ?",
            params![id.as_str(), user_remote_id],
        )?;
        Ok(())
    }

    fn important(&self, id: &ObservationId) -> Result<Option<Important>> {
        let important = self
            .conn
            .query_row(
                "SELECT observation_id, user_remote_id, description, timestamp, important, \
                 dirty FROM observation_importants WHERE observation_id = ?",
                params![id.as_str()],
                Self::parse_important,
            )
            .optional()?;
        Ok(important)
    }

    fn save_important(&self, important: &Important) -> Result<()> {
        self.conn.execute(
            "INSERT INTO observation_importants (observation_id, user_remote_id, description, \
             timestamp, important, dirty) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(observation_id) DO UPDATE SET \
             user_remote_id = excluded.user_remote_id, description = excluded.description, \
             timestamp = excluded.timestamp, important = excluded.important, \
             dirty = excluded.dirty",
            params![
                important.observation_id.as_str(),
                important.user_remote_id,
                important.description,
                important.timestamp,
                i32::from(important.important),
                i32::from(important.dirty),
            ],
        )?;
        Ok(())
    }

    fn delete_important(&self, id: &ObservationId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM observation_importants WHERE observation_id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        match f(self) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            // Dropping the transaction rolls back the chunk's mutations
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ObservationProperties;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn point() -> Geometry {
        Geometry::from_wire(&json!({"type": "Point", "coordinates": [1.0, 2.0]})).unwrap()
    }

    fn observation() -> Observation {
        Observation::new_local(
            "event-1",
            "user-1",
            point(),
            ObservationProperties {
                timestamp: 1_700_000_000_000,
                forms: Vec::new(),
            },
        )
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        repo.insert(&observation).unwrap();

        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert_eq!(fetched, observation);
    }

    #[test]
    fn test_find_by_remote_id() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let mut observation = observation();
        observation.remote_id = Some("abc123".to_string());
        repo.insert(&observation).unwrap();

        let fetched = repo.find_by_remote_id("abc123").unwrap().unwrap();
        assert_eq!(fetched.id, observation.id);
        assert!(repo.find_by_remote_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_round_trips_all_fields() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let mut observation = observation();
        repo.insert(&observation).unwrap();

        observation.last_modified = 42;
        observation.dirty = false;
        observation.state = ObservationState::Archived;
        observation.error = Some(PushError {
            status: Some(400),
            message: "bad form".to_string(),
        });
        repo.save(&observation).unwrap();

        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert_eq!(fetched, observation);
    }

    #[test]
    fn test_delete_cascades() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        repo.insert(&observation).unwrap();
        repo.save_favorite(&Favorite::synced(observation.id, "user-2"))
            .unwrap();
        repo.save_important(&Important::synced(observation.id, None, None, None))
            .unwrap();

        repo.delete(&observation.id).unwrap();
        assert!(repo.get(&observation.id).unwrap().is_none());
        assert!(repo.favorites(&observation.id).unwrap().is_empty());
        assert!(repo.important(&observation.id).unwrap().is_none());
    }

    #[test]
    fn test_try_begin_sync_guard() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        repo.insert(&observation).unwrap();

        assert!(repo.try_begin_sync(&observation.id).unwrap());
        // Second push attempt while one is in flight is refused
        assert!(!repo.try_begin_sync(&observation.id).unwrap());

        repo.finish_sync(&observation.id, None).unwrap();
        assert!(repo.try_begin_sync(&observation.id).unwrap());
    }

    #[test]
    fn test_finish_sync_records_error() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        repo.insert(&observation).unwrap();
        repo.try_begin_sync(&observation.id).unwrap();

        let error = PushError {
            status: Some(400),
            message: "missing required field".to_string(),
        };
        repo.finish_sync(&observation.id, Some(&error)).unwrap();

        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert!(!fetched.syncing);
        assert_eq!(fetched.error, Some(error.clone()));

        // A transient failure on the next attempt leaves the error in place
        repo.try_begin_sync(&observation.id).unwrap();
        repo.abort_sync(&observation.id).unwrap();
        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert!(!fetched.syncing);
        assert_eq!(fetched.error, Some(error));
    }

    #[test]
    fn test_stamp_remote_identity_exactly_once() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        repo.insert(&observation).unwrap();

        repo.stamp_remote_identity(&observation.id, "500", "https://s/obs/500")
            .unwrap();
        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert_eq!(fetched.remote_id.as_deref(), Some("500"));
        assert_eq!(fetched.remote_url.as_deref(), Some("https://s/obs/500"));

        // remote_id is immutable once assigned
        assert!(repo
            .stamp_remote_identity(&observation.id, "501", "https://s/obs/501")
            .is_err());
    }

    #[test]
    fn test_watermark_excludes_local_user() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let mut mine = observation();
        mine.remote_id = Some("1".to_string());
        mine.last_modified = 900;
        repo.insert(&mine).unwrap();

        let mut theirs = observation();
        theirs.remote_id = Some("2".to_string());
        theirs.user_remote_id = Some("user-2".to_string());
        theirs.last_modified = 500;
        repo.insert(&theirs).unwrap();

        // Own records do not advance the watermark
        assert_eq!(repo.watermark("event-1", "user-1").unwrap(), Some(500));
        assert_eq!(repo.watermark("other-event", "user-1").unwrap(), None);
    }

    #[test]
    fn test_list_dirty_skips_syncing() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let first = observation();
        repo.insert(&first).unwrap();
        let second = observation();
        repo.insert(&second).unwrap();
        repo.try_begin_sync(&second.id).unwrap();

        let dirty = repo.list_dirty("event-1").unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, first.id);
    }

    #[test]
    fn test_favorite_upsert() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        repo.insert(&observation).unwrap();

        repo.save_favorite(&Favorite::local_toggle(observation.id, "user-2", true))
            .unwrap();
        repo.save_favorite(&Favorite::synced(observation.id, "user-2"))
            .unwrap();

        let favorites = repo.favorites(&observation.id).unwrap();
        assert_eq!(favorites.len(), 1);
        assert!(!favorites[0].dirty);

        repo.delete_favorite(&observation.id, "user-2").unwrap();
        assert!(repo.favorites(&observation.id).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let observation = observation();
        let result: Result<()> = repo.in_transaction(|r| {
            r.insert(&observation)?;
            Err(Error::InvalidInput("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(repo.get(&observation.id).unwrap().is_none());

        repo.in_transaction(|r| r.insert(&observation)).unwrap();
        assert!(repo.get(&observation.id).unwrap().is_some());
    }

    #[test]
    fn test_complete_push_clears_flags_when_content_unchanged() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let mut observation = observation();
        observation.error = Some(PushError {
            status: Some(400),
            message: "old failure".to_string(),
        });
        repo.insert(&observation).unwrap();
        assert!(repo.try_begin_sync(&observation.id).unwrap());

        repo.complete_push(&observation, Some(7_000)).unwrap();

        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert!(!fetched.dirty);
        assert!(!fetched.syncing);
        assert!(fetched.error.is_none());
        assert_eq!(fetched.last_modified, 7_000);
    }

    #[test]
    fn test_complete_push_keeps_midflight_edit_dirty() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let snapshot = observation();
        repo.insert(&snapshot).unwrap();
        assert!(repo.try_begin_sync(&snapshot.id).unwrap());

        // An edit lands after the push snapshot was taken
        let mut edited = snapshot.clone();
        edited.properties.timestamp = 999_000;
        edited.timestamp = 999_000;
        edited.dirty = true;
        edited.syncing = true;
        repo.save(&edited).unwrap();

        repo.complete_push(&snapshot, Some(7_000)).unwrap();

        let fetched = repo.get(&snapshot.id).unwrap().unwrap();
        assert_eq!(fetched.timestamp, 999_000);
        assert!(fetched.dirty);
        assert!(!fetched.syncing);
        assert_eq!(fetched.last_modified, 7_000);
    }

    #[test]
    fn test_complete_push_without_remote_time_keeps_last_modified() {
        let db = setup();
        let repo = SqliteObservationRepository::new(db.connection());

        let mut observation = observation();
        observation.last_modified = 5_000;
        repo.insert(&observation).unwrap();

        repo.complete_push(&observation, None).unwrap();

        let fetched = repo.get(&observation.id).unwrap().unwrap();
        assert!(!fetched.dirty);
        assert_eq!(fetched.last_modified, 5_000);
    }

    #[test]
    fn test_corrupt_stored_id_is_an_error() {
        let db = setup();
        db.connection()
            .execute(
                "INSERT INTO observations (id, remote_id, event_remote_id, geometry, \
                 properties, timestamp, last_modified) \
                 VALUES ('not-a-uuid', 'r1', 'event-1', ?, ?, 0, 0)",
                params![
                    br#"{"type":"Point","coordinates":[0,0]}"#.to_vec(),
                    r#"{"timestamp":0,"forms":[]}"#,
                ],
            )
            .unwrap();

        let repo = SqliteObservationRepository::new(db.connection());
        assert!(repo.find_by_remote_id("r1").is_err());
    }
}
