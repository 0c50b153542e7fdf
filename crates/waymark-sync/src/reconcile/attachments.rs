//! Attachment list reconciliation
//!
//! The pull path is additive and metadata-refreshing only: entries are
//! matched by remote id and overwritten in place or inserted. Attachments
//! present locally but absent from the incoming list are left alone —
//! removal belongs to the explicit user-driven deletion flow.

use waymark_core::db::ObservationRepository;
use waymark_core::models::{Attachment, AttachmentId, Observation};

use crate::error::SyncResult;
use crate::wire::AttachmentJson;

/// Merge a remote observation's attachment list into local records.
pub fn reconcile<R: ObservationRepository>(
    repo: &R,
    observation: &Observation,
    incoming: &[AttachmentJson],
) -> SyncResult<()> {
    let existing = repo.attachments(&observation.id)?;

    for entry in incoming {
        let matched = existing
            .iter()
            .find(|a| a.remote_id.as_deref() == Some(entry.id.as_str()));

        let attachment = match matched {
            Some(local) => Attachment {
                content_type: entry
                    .content_type
                    .clone()
                    .unwrap_or_else(|| local.content_type.clone()),
                name: entry.name.clone().unwrap_or_else(|| local.name.clone()),
                size: entry.size.unwrap_or(local.size),
                url: entry.url.clone().or_else(|| local.url.clone()),
                remote_path: entry.remote_path.clone().or_else(|| local.remote_path.clone()),
                observation_form_id: entry
                    .observation_form_id
                    .clone()
                    .or_else(|| local.observation_form_id.clone()),
                field_name: entry.field_name.clone().or_else(|| local.field_name.clone()),
                ..local.clone()
            },
            None => Attachment {
                id: AttachmentId::new(),
                observation_id: observation.id,
                remote_id: Some(entry.id.clone()),
                observation_form_id: entry.observation_form_id.clone(),
                field_name: entry.field_name.clone(),
                content_type: entry.content_type.clone().unwrap_or_default(),
                name: entry.name.clone().unwrap_or_default(),
                size: entry.size.unwrap_or(0),
                url: entry.url.clone(),
                remote_path: entry.remote_path.clone(),
                local_path: None,
                dirty: false,
                marked_for_deletion: false,
            },
        };

        repo.save_attachment(&attachment)?;
    }

    Ok(())
}
