//! waymark-core - Core library for Waymark
//!
//! This crate contains the shared models, database layer, and geometry codec
//! used by the sync engine and the surrounding application.

pub mod db;
pub mod error;
pub mod geometry;
pub mod models;

pub use error::{Error, Result};
pub use geometry::Geometry;
pub use models::{Observation, ObservationId};
