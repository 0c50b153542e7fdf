//! Observation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::geometry::Geometry;

/// A unique local identifier for an observation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationId(Uuid);

impl ObservationId {
    /// Create a new unique observation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObservationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-side lifecycle state of an observation.
///
/// `Archived` is the server's soft-delete signal; during pull reconciliation
/// it always wins over local dirty state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationState {
    /// Live observation
    Active,
    /// Soft-deleted on the server (or pending a delete push locally)
    Archived,
}

impl ObservationState {
    /// Parse the wire `state.name` value.
    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "active" => Some(Self::Active),
            "archive" => Some(Self::Archived),
            _ => None,
        }
    }

    /// The wire `state.name` value.
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archive",
        }
    }
}

/// Structured validation failure recorded from the last failed push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushError {
    /// HTTP status code, when the failure came from a response
    pub status: Option<u16>,
    /// Server-provided message
    pub message: String,
}

/// One form's worth of captured field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormEntry {
    /// Identifier of the form definition this entry was captured against
    #[serde(rename = "formId")]
    pub form_id: String,
    /// Field values keyed by field name; values are opaque to the engine
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// The form-structured content document of an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObservationProperties {
    /// Capture timestamp (Unix ms)
    pub timestamp: i64,
    /// Captured form entries
    pub forms: Vec<FormEntry>,
}

/// A geotagged, form-structured field report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Local identifier, stable for the record's local lifetime
    pub id: ObservationId,
    /// Server-assigned identifier; absent until the first successful create push
    pub remote_id: Option<String>,
    /// Server-issued resource URL, stamped together with `remote_id`
    pub remote_url: Option<String>,
    /// Remote id of the event this observation is scoped to
    pub event_remote_id: String,
    /// Remote id of the creating user
    pub user_remote_id: Option<String>,
    /// Geotag
    pub geometry: Geometry,
    /// Form-structured content
    pub properties: ObservationProperties,
    /// Capture timestamp (Unix ms)
    pub timestamp: i64,
    /// Server-asserted modification time (Unix ms); 0 until first sync
    pub last_modified: i64,
    /// Local content differs from last-known-server content
    pub dirty: bool,
    /// A push is currently in flight for this record
    pub syncing: bool,
    /// Server-side lifecycle state
    pub state: ObservationState,
    /// Validation failure from the last failed push, if any
    pub error: Option<PushError>,
}

impl Observation {
    /// Create a locally captured observation, pending its first push.
    #[must_use]
    pub fn new_local(
        event_remote_id: impl Into<String>,
        user_remote_id: impl Into<String>,
        geometry: Geometry,
        properties: ObservationProperties,
    ) -> Self {
        let timestamp = properties.timestamp;
        Self {
            id: ObservationId::new(),
            remote_id: None,
            remote_url: None,
            event_remote_id: event_remote_id.into(),
            user_remote_id: Some(user_remote_id.into()),
            geometry,
            properties,
            timestamp,
            last_modified: 0,
            dirty: true,
            syncing: false,
            state: ObservationState::Active,
            error: None,
        }
    }

    /// Classify the record's position in the sync lifecycle.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        if self.syncing {
            if self.remote_id.is_none() {
                SyncStatus::Creating
            } else {
                SyncStatus::Pushing
            }
        } else if self.error.is_some() {
            SyncStatus::Error
        } else if self.remote_id.is_none() {
            SyncStatus::LocalOnly
        } else if self.dirty {
            SyncStatus::Dirty
        } else {
            SyncStatus::Synced
        }
    }

    /// Mark the record archived and dirty, queueing a delete push.
    pub fn mark_archived(&mut self) {
        self.state = ObservationState::Archived;
        self.dirty = true;
    }
}

/// Read-only lifecycle classification derived from the sync-control fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Never pushed; no remote identity yet
    LocalOnly,
    /// Create push in flight
    Creating,
    /// Remote identity assigned, no pending local edit
    Synced,
    /// Local edit pending push
    Dirty,
    /// Update or delete push in flight
    Pushing,
    /// Last push failed validation; record stays dirty until the user acts
    Error,
}
