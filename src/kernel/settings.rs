use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Opaque configuration object as delivered by the settings endpoint.
pub type JsonObject = Map<String, Value>;

/// Key of the first-party destination inside `integrations`.
pub const SEGMENT_DESTINATION_KEY: &str = "Segment.io";

const KNOWN_FIELDS: [&str; 3] = ["integrations", "plan", "edgeFunction"];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("settings payload must be a JSON object")]
    NotAnObject,
    #[error("settings field `{field}` must be a JSON object")]
    FieldNotAnObject { field: &'static str },
}

/// Remote configuration. Replaced wholesale on every successful refresh,
/// never patched in place.
///
/// Absent (or `null`) fields normalize to an empty object so downstream
/// plugins can always iterate them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, deserialize_with = "object_or_empty")]
    pub integrations: JsonObject,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub plan: JsonObject,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub edge_function: JsonObject,
}

impl Settings {
    pub fn new(integrations: JsonObject, plan: JsonObject, edge_function: JsonObject) -> Self {
        Self {
            integrations,
            plan,
            edge_function,
        }
    }

    /// Parses a raw settings response body.
    ///
    /// Unknown top-level keys are ignored. A known key carrying anything other
    /// than an object (or `null`) rejects the whole payload.
    pub fn parse(body: &[u8]) -> Result<Self, SettingsError> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Object(root) = value else {
            return Err(SettingsError::NotAnObject);
        };

        for field in KNOWN_FIELDS {
            match root.get(field) {
                None | Some(Value::Null) | Some(Value::Object(_)) => {}
                Some(_) => return Err(SettingsError::FieldNotAnObject { field }),
            }
        }

        Ok(serde_json::from_value(Value::Object(root))?)
    }

    /// Fallback settings enabling only the first-party destination.
    pub fn default_for(write_key: &str, api_host: &str) -> Self {
        let mut segment = JsonObject::new();
        segment.insert("apiKey".to_string(), Value::String(write_key.to_string()));
        segment.insert("apiHost".to_string(), Value::String(api_host.to_string()));

        let mut integrations = JsonObject::new();
        integrations.insert(SEGMENT_DESTINATION_KEY.to_string(), Value::Object(segment));

        Self {
            integrations,
            ..Self::default()
        }
    }

    pub fn has_integration_settings(&self, key: &str) -> bool {
        self.integrations.contains_key(key)
    }

    /// Decodes one destination's configuration into a typed value.
    /// Returns `None` when the entry is missing or does not match `T`.
    pub fn destination_settings<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.integrations.get(key)?;
        serde_json::from_value(raw.clone()).ok()
    }
}

fn object_or_empty<'de, D>(deserializer: D) -> Result<JsonObject, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<JsonObject>::deserialize(deserializer)?.unwrap_or_default())
}
