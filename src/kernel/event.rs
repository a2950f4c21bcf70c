use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::settings::JsonObject;
use super::state::UserInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Identify,
    Screen,
    Group,
    Alias,
}

/// An application-emitted event as it flows through the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub message_id: String,
    #[serde(default)]
    pub anonymous_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Track event name, screen name or group id depending on `kind`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: JsonObject,
    #[serde(default)]
    pub context: JsonObject,
    #[serde(default)]
    pub integrations: JsonObject,
}

impl Event {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            message_id: Uuid::new_v4().to_string(),
            anonymous_id: String::new(),
            user_id: None,
            name: None,
            properties: JsonObject::new(),
            context: JsonObject::new(),
            integrations: JsonObject::new(),
        }
    }

    pub fn track(name: &str, properties: JsonObject) -> Self {
        Self {
            name: Some(name.to_string()),
            properties,
            ..Self::new(EventType::Track)
        }
    }

    pub fn screen(name: &str, properties: JsonObject) -> Self {
        Self {
            name: Some(name.to_string()),
            properties,
            ..Self::new(EventType::Screen)
        }
    }

    pub fn identify(user_id: &str, traits: JsonObject) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            properties: traits,
            ..Self::new(EventType::Identify)
        }
    }

    /// Fills identity fields the caller left blank.
    pub fn with_identity(mut self, user: &UserInfo) -> Self {
        if self.anonymous_id.is_empty() {
            self.anonymous_id = user.anonymous_id.clone();
        }
        if self.user_id.is_none() {
            self.user_id = user.user_id.clone();
        }
        self
    }
}
