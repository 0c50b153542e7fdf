//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    debug_assert!(get_version(conn)? == CURRENT_VERSION);
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;

        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Observations table
        CREATE TABLE IF NOT EXISTS observations (
            id TEXT PRIMARY KEY,
            remote_id TEXT UNIQUE,
            remote_url TEXT,
            event_remote_id TEXT NOT NULL,
            user_remote_id TEXT,
            geometry BLOB NOT NULL,
            properties TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            last_modified INTEGER NOT NULL DEFAULT 0,
            dirty INTEGER NOT NULL DEFAULT 0,
            syncing INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'active',
            error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_observations_event_modified
            ON observations(event_remote_id, last_modified DESC);
        CREATE INDEX IF NOT EXISTS idx_observations_dirty ON observations(dirty);

        -- Attachments table
        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            observation_id TEXT NOT NULL REFERENCES observations(id) ON DELETE CASCADE,
            remote_id TEXT,
            observation_form_id TEXT,
            field_name TEXT,
            content_type TEXT NOT NULL,
            name TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            url TEXT,
            remote_path TEXT,
            local_path TEXT,
            dirty INTEGER NOT NULL DEFAULT 0,
            marked_for_deletion INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_attachments_observation
            ON attachments(observation_id);

        -- Favorite markers, one row per (observation, user)
        CREATE TABLE IF NOT EXISTS observation_favorites (
            observation_id TEXT NOT NULL REFERENCES observations(id) ON DELETE CASCADE,
            user_remote_id TEXT NOT NULL,
            favorite INTEGER NOT NULL DEFAULT 1,
            dirty INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (observation_id, user_remote_id)
        );

        -- Important marker, at most one per observation
        CREATE TABLE IF NOT EXISTS observation_importants (
            observation_id TEXT PRIMARY KEY REFERENCES observations(id) ON DELETE CASCADE,
            user_remote_id TEXT,
            description TEXT,
            timestamp INTEGER,
            important INTEGER NOT NULL DEFAULT 1,
            dirty INTEGER NOT NULL DEFAULT 0
        );

        -- Record migration version
        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}
