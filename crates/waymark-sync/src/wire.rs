//! Typed wire payloads for the remote observation API
//!
//! Remote JSON is decoded into these tagged structures at the boundary;
//! malformed records are rejected here and never propagated into
//! reconciliation as untyped maps. Geometry and form field values are
//! carried as opaque JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use waymark_core::models::{Attachment, FormEntry, Observation, ObservationState};
use waymark_core::Geometry;

use crate::error::{SyncError, SyncResult};

/// A remote observation as delivered by
/// `GET /api/events/{event}/observations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationJson {
    /// Server-assigned observation id
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    /// Server-asserted modification time
    pub last_modified: DateTime<Utc>,
    /// Server resource URL for this observation
    #[serde(default)]
    pub url: Option<String>,
    /// Lifecycle state tag
    pub state: StateJson,
    /// Opaque GeoJSON-like geometry
    pub geometry: Value,
    /// Remote id of the creating user
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub user_id: Option<String>,
    /// Form-structured content plus favorite/important sub-collections
    pub properties: PropertiesJson,
    /// Attachment metadata entries
    #[serde(default)]
    pub attachments: Vec<AttachmentJson>,
}

/// The `state` object of an observation payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StateJson {
    /// `"active"` or `"archive"`
    pub name: String,
}

/// The `properties` document of an observation payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesJson {
    /// Capture timestamp
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw form entries; converted via [`forms_from_wire`]
    #[serde(default)]
    pub forms: Vec<Value>,
    /// User ids who favorited this observation
    #[serde(default)]
    pub favorite_user_ids: Vec<String>,
    /// The important marker, when set
    #[serde(default)]
    pub important: Option<ImportantJson>,
}

/// The `properties.important` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportantJson {
    /// Remote id of the flagging user
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub user_id: Option<String>,
    /// Reason for the flag
    #[serde(default)]
    pub description: Option<String>,
    /// When the flag was set
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One entry of the `attachments` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentJson {
    /// Server-assigned attachment id
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    /// Content MIME type
    #[serde(default)]
    pub content_type: Option<String>,
    /// Original file name
    #[serde(default)]
    pub name: Option<String>,
    /// Size in bytes
    #[serde(default)]
    pub size: Option<i64>,
    /// Download URL
    #[serde(default)]
    pub url: Option<String>,
    /// Server-side storage path
    #[serde(default)]
    pub remote_path: Option<String>,
    /// Form entry this attachment belongs to
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub observation_form_id: Option<String>,
    /// Form field this attachment belongs to
    #[serde(default)]
    pub field_name: Option<String>,
}

/// Response of `POST /api/events/{event}/observations/id`.
///
/// The create endpoint returns identity only; content acceptance happens via
/// the follow-up update.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponseJson {
    /// Server-assigned observation id
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    /// Server resource URL for the new observation
    pub url: String,
}

impl ObservationJson {
    /// Decode and validate one pulled record.
    pub fn decode(value: &Value) -> SyncResult<Self> {
        let decoded: Self = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::InvalidPayload(e.to_string()))?;
        // Fail unknown states and malformed geometry up front
        decoded.observation_state()?;
        decoded.geometry()?;
        Ok(decoded)
    }

    /// The parsed lifecycle state.
    pub fn observation_state(&self) -> SyncResult<ObservationState> {
        ObservationState::from_wire_name(&self.state.name).ok_or_else(|| {
            SyncError::InvalidPayload(format!("unknown observation state {:?}", self.state.name))
        })
    }

    /// The validated geometry.
    pub fn geometry(&self) -> SyncResult<Geometry> {
        Geometry::from_wire(&self.geometry).map_err(|e| SyncError::InvalidPayload(e.to_string()))
    }

    /// Modification time as storage millis.
    #[must_use]
    pub fn last_modified_millis(&self) -> i64 {
        self.last_modified.timestamp_millis()
    }

    /// Capture timestamp as storage millis; falls back to `lastModified`.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.properties
            .timestamp
            .map_or_else(|| self.last_modified_millis(), |t| t.timestamp_millis())
    }
}

/// Convert raw wire form entries into model form entries.
///
/// Accepts numeric or string `formId` tags; anything without a tag fails the
/// whole record.
pub fn forms_from_wire(values: &[Value]) -> SyncResult<Vec<FormEntry>> {
    values
        .iter()
        .map(|value| {
            let object = value
                .as_object()
                .ok_or_else(|| SyncError::InvalidPayload("form entry is not an object".into()))?;
            let form_id = object
                .get("formId")
                .and_then(value_as_string)
                .ok_or_else(|| SyncError::InvalidPayload("form entry missing formId".into()))?;
            let fields = object
                .iter()
                .filter(|(key, _)| key.as_str() != "formId")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Ok(FormEntry { form_id, fields })
        })
        .collect()
}

/// Serialize form entries back to their wire shape.
fn forms_to_wire(entries: &[FormEntry]) -> Vec<Map<String, Value>> {
    entries
        .iter()
        .map(|entry| {
            let mut object = entry.fields.clone();
            object.insert("formId".to_string(), Value::String(entry.form_id.clone()));
            object
        })
        .collect()
}

/// Build the full-content update body for a push.
///
/// Attachments marked for deletion (and already known to the server) are
/// merged into their form's attachment field as `{"action": "delete"}`
/// directives; their rows are removed locally only after the server accepts
/// the update.
#[must_use]
pub fn update_body(observation: &Observation, attachments: &[Attachment]) -> Value {
    let mut forms = forms_to_wire(&observation.properties.forms);

    for attachment in attachments {
        if !attachment.marked_for_deletion {
            continue;
        }
        let (Some(remote_id), Some(form_id), Some(field_name)) = (
            attachment.remote_id.as_ref(),
            attachment.observation_form_id.as_ref(),
            attachment.field_name.as_ref(),
        ) else {
            continue;
        };

        let Some(form) = forms
            .iter_mut()
            .find(|form| form.get("formId").and_then(value_as_string).as_deref() == Some(form_id))
        else {
            continue;
        };

        let directive = json!({"action": "delete", "id": remote_id});
        match form.get_mut(field_name) {
            Some(Value::Array(entries)) => entries.push(directive),
            _ => {
                form.insert(field_name.clone(), Value::Array(vec![directive]));
            }
        }
    }

    json!({
        "geometry": observation.geometry.to_wire(),
        "properties": {
            "timestamp": millis_to_iso(observation.properties.timestamp),
            "forms": forms,
        },
        "state": {"name": observation.state.wire_name()},
    })
}

/// Build the important-marker PUT body.
#[must_use]
pub fn important_body(description: Option<&str>) -> Value {
    json!({"description": description})
}

/// Render storage millis as the wire ISO-8601 UTC form.
#[must_use]
pub fn millis_to_iso(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

mod lenient {
    //! Accept ids the server emits as either strings or numbers.

    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        let value = Value::deserialize(deserializer)?;
        super::value_as_string(&value)
            .ok_or_else(|| serde::de::Error::custom("expected a string or number"))
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(value) => super::value_as_string(&value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("expected a string or number")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use waymark_core::models::ObservationProperties;

    fn remote_observation() -> Value {
        json!({
            "id": "obs-1",
            "lastModified": "2024-03-01T10:15:30.000Z",
            "url": "https://server/api/events/7/observations/obs-1",
            "state": {"name": "active"},
            "geometry": {"type": "Point", "coordinates": [-104.8, 39.6]},
            "userId": "user-2",
            "properties": {
                "timestamp": "2024-03-01T10:00:00.000Z",
                "forms": [{"formId": 42, "weather": "clear"}],
                "favoriteUserIds": ["user-3"],
                "important": {"userId": "user-4", "description": "urgent"}
            },
            "attachments": [{
                "id": 900,
                "contentType": "image/jpeg",
                "name": "photo.jpg",
                "size": 2048,
                "remotePath": "/var/attachments/900",
                "observationFormId": 42,
                "fieldName": "photos"
            }]
        })
    }

    #[test]
    fn test_decode_full_observation() {
        let decoded = ObservationJson::decode(&remote_observation()).unwrap();

        assert_eq!(decoded.id, "obs-1");
        assert_eq!(
            decoded.observation_state().unwrap(),
            ObservationState::Active
        );
        assert_eq!(decoded.user_id.as_deref(), Some("user-2"));
        assert_eq!(decoded.properties.favorite_user_ids, vec!["user-3"]);
        assert_eq!(
            decoded
                .properties
                .important
                .as_ref()
                .and_then(|i| i.description.as_deref()),
            Some("urgent")
        );

        // Numeric ids are normalized to strings
        assert_eq!(decoded.attachments[0].id, "900");
        assert_eq!(
            decoded.attachments[0].observation_form_id.as_deref(),
            Some("42")
        );

        let forms = forms_from_wire(&decoded.properties.forms).unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].form_id, "42");
        assert_eq!(forms[0].fields.get("weather"), Some(&json!("clear")));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // Missing state
        let mut value = remote_observation();
        value.as_object_mut().unwrap().remove("state");
        assert!(ObservationJson::decode(&value).is_err());

        // Unknown state name
        let mut value = remote_observation();
        value["state"]["name"] = json!("paused");
        assert!(ObservationJson::decode(&value).is_err());

        // Untyped geometry
        let mut value = remote_observation();
        value["geometry"] = json!({"coordinates": [0, 0]});
        assert!(ObservationJson::decode(&value).is_err());
    }

    #[test]
    fn test_timestamp_falls_back_to_last_modified() {
        let mut value = remote_observation();
        value["properties"]
            .as_object_mut()
            .unwrap()
            .remove("timestamp");
        let decoded = ObservationJson::decode(&value).unwrap();
        assert_eq!(decoded.timestamp_millis(), decoded.last_modified_millis());
    }

    #[test]
    fn test_update_body_merges_deletion_directives() {
        let geometry =
            Geometry::from_wire(&json!({"type": "Point", "coordinates": [0.0, 0.0]})).unwrap();
        let forms = forms_from_wire(&[json!({"formId": "42", "photos": []})]).unwrap();
        let observation = Observation::new_local(
            "event-7",
            "user-1",
            geometry,
            ObservationProperties {
                timestamp: 1_709_287_200_000,
                forms,
            },
        );

        let mut doomed = Attachment::new_local(
            observation.id,
            "photo.jpg",
            "image/jpeg",
            10,
            "/captures/photo.jpg",
        )
        .unwrap();
        doomed.remote_id = Some("900".to_string());
        doomed.observation_form_id = Some("42".to_string());
        doomed.field_name = Some("photos".to_string());
        doomed.marked_for_deletion = true;

        // Local-only deletions never reach the payload
        let mut local_only = doomed.clone();
        local_only.remote_id = None;

        let body = update_body(&observation, &[doomed, local_only]);
        assert_eq!(
            body["properties"]["forms"][0]["photos"],
            json!([{"action": "delete", "id": "900"}])
        );
        assert_eq!(body["state"]["name"], json!("active"));
        assert_eq!(
            body["properties"]["timestamp"],
            json!("2024-03-01T10:00:00.000Z")
        );
    }

    #[test]
    fn test_forms_from_wire_requires_form_id() {
        assert!(forms_from_wire(&[json!({"weather": "clear"})]).is_err());
        assert!(forms_from_wire(&[json!("not an object")]).is_err());
    }
}
