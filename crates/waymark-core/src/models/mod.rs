//! Data models for Waymark

mod attachment;
mod favorite;
mod important;
mod observation;

pub use attachment::{Attachment, AttachmentId};
pub use favorite::Favorite;
pub use important::Important;
pub use observation::{
    FormEntry, Observation, ObservationId, ObservationProperties, ObservationState, PushError,
    SyncStatus,
};
