//! Opaque geometry value and its wire/storage codec
//!
//! The engine never interprets coordinates. A geometry is an opaque GeoJSON-like
//! object validated at the wire boundary and round-tripped as-is: JSON on the
//! wire, compact JSON bytes in storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// An opaque GeoJSON-like geometry value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry(Value);

impl Geometry {
    /// Validate and accept a geometry from a wire JSON value.
    ///
    /// Requires a JSON object carrying a string `type` tag. Anything else is
    /// rejected at this boundary rather than propagated into reconciliation.
    pub fn from_wire(value: &Value) -> Result<Self> {
        match value.get("type").and_then(Value::as_str) {
            Some(kind) if !kind.is_empty() => Ok(Self(value.clone())),
            _ => Err(Error::InvalidGeometry(
                "geometry must be an object with a string `type` field".to_string(),
            )),
        }
    }

    /// The wire JSON representation.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        self.0.clone()
    }

    /// Encode to the storage binary form (compact JSON bytes).
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Decode from the storage binary form.
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_wire(&value)
    }

    /// The GeoJSON `type` tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.0
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}
