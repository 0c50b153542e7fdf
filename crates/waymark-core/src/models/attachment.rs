//! Attachment model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::observation::ObservationId;

/// A unique local identifier for an attachment, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a new unique attachment ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Attachment metadata persisted for an observation.
///
/// A local-only attachment (`remote_id` absent, `local_path` set) is awaiting
/// upload and is never touched by pull reconciliation. One marked for deletion
/// is excluded from push payloads as content and emitted as a deletion
/// directive instead; the row is removed only after server confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique local attachment identifier.
    pub id: AttachmentId,
    /// Parent observation identifier.
    pub observation_id: ObservationId,
    /// Server-assigned identifier; absent until uploaded.
    pub remote_id: Option<String>,
    /// Form entry this attachment belongs to, when form-scoped.
    pub observation_form_id: Option<String>,
    /// Form field this attachment belongs to, when form-scoped.
    pub field_name: Option<String>,
    /// Content MIME type.
    pub content_type: String,
    /// Original file name.
    pub name: String,
    /// Attachment size in bytes.
    pub size: i64,
    /// Server download URL.
    pub url: Option<String>,
    /// Server-side storage path.
    pub remote_path: Option<String>,
    /// Local file path for not-yet-uploaded content.
    pub local_path: Option<String>,
    /// Local metadata differs from last-known-server metadata.
    pub dirty: bool,
    /// User requested deletion; pushed as a directive, removed on confirmation.
    pub marked_for_deletion: bool,
}

impl Attachment {
    /// Create a locally captured attachment pending upload.
    pub fn new_local(
        observation_id: ObservationId,
        name: impl Into<String>,
        content_type: impl Into<String>,
        size: i64,
        local_path: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let content_type = content_type.into().trim().to_string();
        let local_path = local_path.into().trim().to_string();

        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment name cannot be empty".to_string(),
            ));
        }
        if content_type.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment content_type cannot be empty".to_string(),
            ));
        }
        if local_path.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment local_path cannot be empty".to_string(),
            ));
        }
        if size < 0 {
            return Err(Error::InvalidInput(
                "Attachment size cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            id: AttachmentId::new(),
            observation_id,
            remote_id: None,
            observation_form_id: None,
            field_name: None,
            content_type,
            name,
            size,
            url: None,
            remote_path: None,
            local_path: Some(local_path),
            dirty: true,
            marked_for_deletion: false,
        })
    }

    /// True when this attachment exists only locally (never uploaded).
    #[must_use]
    pub const fn is_local_only(&self) -> bool {
        self.remote_id.is_none()
    }
}
