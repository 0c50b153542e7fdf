//! Database layer for Waymark

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{ObservationRepository, SqliteObservationRepository};
