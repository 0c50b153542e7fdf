//! waymark-sync - Observation synchronization and reconciliation engine
//!
//! Keeps the locally mutable observation store reconciled with the remote
//! service: the pull path ingests remote batches in bounded chunks and merges
//! them without destroying unsynced local edits; the push path uploads local
//! creates/updates/deletes and stamps server-assigned identity back onto
//! local records.

pub mod context;
pub mod error;
pub mod pull;
pub mod push;
pub mod reconcile;
pub mod service;
pub mod wire;

pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use pull::{PullCoordinator, PullNotification, PullReport};
pub use push::{PushCoordinator, PushOutcome};
pub use service::{HttpRemoteService, MockRemoteService, RemoteService};
