//! Outbound create/update/delete/favorite/important submissions
//!
//! A push for a record only starts when no other push is in flight for it
//! (the `syncing` guard). Transient failures clear the guard and propagate
//! for the external scheduler to retry; validation failures are recorded on
//! the record and wait for the user.

use waymark_core::db::ObservationRepository;
use waymark_core::models::{Observation, ObservationId, ObservationState, PushError};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::service::RemoteService;
use crate::wire::{self, ObservationJson};

/// Result of one content push cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// First push: server identity assigned, content uploaded
    Created {
        /// The server-assigned id
        remote_id: String,
    },
    /// Content uploaded for an existing remote record
    Updated,
    /// Record removed locally after server delete (or 404)
    Deleted,
    /// Server rejected the content; error recorded, record stays dirty
    Rejected,
    /// Another push is already in flight for this record
    InFlight,
}

/// Drives outbound submissions for one observation at a time.
pub struct PushCoordinator<'a, R, S> {
    repo: &'a R,
    service: &'a S,
}

impl<'a, R: ObservationRepository, S: RemoteService> PushCoordinator<'a, R, S> {
    /// Create a coordinator over a repository and remote service.
    pub const fn new(repo: &'a R, service: &'a S) -> Self {
        Self { repo, service }
    }

    /// Push the record's content: create, update, or delete per local state.
    pub async fn push(&self, ctx: &SyncContext, id: &ObservationId) -> SyncResult<PushOutcome> {
        let observation = self
            .repo
            .get(id)?
            .ok_or_else(|| waymark_core::Error::NotFound(id.to_string()))?;

        if !self.repo.try_begin_sync(id)? {
            return Ok(PushOutcome::InFlight);
        }

        let result = match (&observation.remote_id, observation.state) {
            (None, _) => self.push_create(ctx, &observation).await,
            (Some(_), ObservationState::Archived) => self.push_delete(&observation).await,
            (Some(_), ObservationState::Active) => self
                .push_update(&observation)
                .await
                .map(|outcome| outcome.unwrap_or(PushOutcome::Updated)),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Transient failure: clear the in-flight guard, nothing else
                if self.repo.get(id)?.is_some() {
                    self.repo.abort_sync(id)?;
                }
                Err(e)
            }
        }
    }

    /// Push pending favorite toggles, independently of the content push.
    pub async fn push_favorites(&self, ctx: &SyncContext, id: &ObservationId) -> SyncResult<usize> {
        let observation = self
            .repo
            .get(id)?
            .ok_or_else(|| waymark_core::Error::NotFound(id.to_string()))?;
        let url = observation_url(&observation)?;

        let mut pushed = 0;
        for mut favorite in self.repo.favorites(id)? {
            if !favorite.dirty || favorite.user_remote_id != ctx.user_remote_id {
                continue;
            }
            if favorite.favorite {
                self.service.put_favorite(&url).await?;
                favorite.dirty = false;
                self.repo.save_favorite(&favorite)?;
            } else {
                match self.service.delete_favorite(&url).await {
                    Ok(()) => {}
                    // Already gone on the server: desired state achieved
                    Err(e) if e.status() == Some(404) => {}
                    Err(e) => return Err(e),
                }
                self.repo.delete_favorite(id, &favorite.user_remote_id)?;
            }
            pushed += 1;
        }
        Ok(pushed)
    }

    /// Push a pending important-marker change, independently of the content push.
    pub async fn push_important(&self, id: &ObservationId) -> SyncResult<bool> {
        let observation = self
            .repo
            .get(id)?
            .ok_or_else(|| waymark_core::Error::NotFound(id.to_string()))?;

        let Some(important) = self.repo.important(id)? else {
            return Ok(false);
        };
        if !important.dirty {
            return Ok(false);
        }
        let url = observation_url(&observation)?;

        if important.important {
            let body = wire::important_body(important.description.as_deref());
            self.service.put_important(&url, &body).await?;
            let mut synced = important;
            synced.dirty = false;
            self.repo.save_important(&synced)?;
        } else {
            match self.service.delete_important(&url).await {
                Ok(()) => {}
                Err(e) if e.status() == Some(404) => {}
                Err(e) => return Err(e),
            }
            self.repo.delete_important(id)?;
        }
        Ok(true)
    }

    /// Create path: reserve identity, then immediately upload full content.
    ///
    /// The create endpoint returns identity only, so every create is followed
    /// by one update in the same push cycle.
    async fn push_create(
        &self,
        ctx: &SyncContext,
        observation: &Observation,
    ) -> SyncResult<PushOutcome> {
        let created = self
            .service
            .create_observation_id(&ctx.event_remote_id)
            .await?;

        self.repo
            .stamp_remote_identity(&observation.id, &created.id, &created.url)?;
        tracing::debug!(local_id = %observation.id, remote_id = %created.id, "observation created");

        // Re-read so the update sees the stamped identity
        let stamped = self
            .repo
            .get(&observation.id)?
            .ok_or_else(|| waymark_core::Error::NotFound(observation.id.to_string()))?;

        match self.push_update(&stamped).await? {
            Some(rejected) => Ok(rejected),
            None => Ok(PushOutcome::Created {
                remote_id: created.id,
            }),
        }
    }

    /// Update path; returns `Some(Rejected)` when the server refused the body.
    async fn push_update(&self, observation: &Observation) -> SyncResult<Option<PushOutcome>> {
        let url = observation_url(observation)?;
        let attachments = self.repo.attachments(&observation.id)?;
        let body = wire::update_body(observation, &attachments);

        let response = match self.service.update_observation(&url, &body).await {
            Ok(response) => response,
            Err(e) if is_validation(&e) => {
                let error = push_error(&e);
                self.repo.finish_sync(&observation.id, Some(&error))?;
                tracing::warn!(local_id = %observation.id, error = %error.message, "push rejected");
                return Ok(Some(PushOutcome::Rejected));
            }
            Err(e) => return Err(e),
        };

        let last_modified = match ObservationJson::decode(&response) {
            Ok(remote) => Some(remote.last_modified_millis()),
            // Stale last_modified costs one redundant reconcile on the next
            // pull, nothing worse
            Err(e) => {
                tracing::warn!(local_id = %observation.id, error = %e, "undecodable update response");
                None
            }
        };
        // Flag-only completion: an edit committed while the request was out
        // must keep its content and its dirty bit
        self.repo.complete_push(observation, last_modified)?;

        // The server accepted the deletion directives; drop the rows now
        for attachment in attachments {
            if attachment.marked_for_deletion && attachment.remote_id.is_some() {
                self.repo.delete_attachment(&attachment.id)?;
            }
        }

        Ok(None)
    }

    /// Delete path: server delete or 404 both end in local physical removal.
    async fn push_delete(&self, observation: &Observation) -> SyncResult<PushOutcome> {
        let url = observation_url(observation)?;

        match self.service.delete_observation(&url).await {
            Ok(()) => {}
            // Already gone: the desired end state (absence) is achieved
            Err(e) if e.status() == Some(404) => {}
            Err(e) if is_validation(&e) => {
                let error = push_error(&e);
                self.repo.finish_sync(&observation.id, Some(&error))?;
                return Ok(PushOutcome::Rejected);
            }
            Err(e) => return Err(e),
        }

        self.repo.delete(&observation.id)?;
        tracing::debug!(local_id = %observation.id, "observation deleted");
        Ok(PushOutcome::Deleted)
    }
}

fn observation_url(observation: &Observation) -> SyncResult<String> {
    observation.remote_url.clone().ok_or_else(|| {
        SyncError::InvalidConfiguration(format!(
            "observation {} has no remote URL",
            observation.id
        ))
    })
}

fn is_validation(error: &SyncError) -> bool {
    matches!(error, SyncError::Status { status, .. } if *status >= 400 && *status < 500)
}

fn push_error(error: &SyncError) -> PushError {
    PushError {
        status: error.status(),
        message: error.to_string(),
    }
}
