use serde_json::Value;
use uuid::Uuid;

use super::settings::{JsonObject, Settings};
use super::store::{State, StoreError};
use crate::config::Configuration;

/// Runtime slice holding the active remote configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct System {
    /// `None` until the first successful fetch (or a configured default).
    pub settings: Option<Settings>,
    pub running: bool,
    pub auto_add_segment_destination: bool,
}

impl System {
    pub fn new(configuration: &Configuration) -> Self {
        Self {
            settings: configuration.default_settings.clone(),
            running: false,
            auto_add_segment_destination: configuration.auto_add_segment_destination,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SystemAction {
    /// Wholesale replacement with a freshly parsed value.
    UpdateSettings(Settings),
    ToggleRunning(bool),
    /// Registers an (empty) integration entry so a locally added destination
    /// is considered enabled.
    AddDestinationToSettings { key: String },
}

impl State for System {
    type Action = SystemAction;

    const NAME: &'static str = "system";

    fn reduce(&self, action: SystemAction) -> Result<Self, StoreError> {
        let mut next = self.clone();
        match action {
            SystemAction::UpdateSettings(settings) => {
                next.settings = Some(settings);
            }
            SystemAction::ToggleRunning(running) => {
                next.running = running;
            }
            SystemAction::AddDestinationToSettings { key } => {
                let Some(settings) = next.settings.as_mut() else {
                    return Err(StoreError::ActionRejected {
                        slice: Self::NAME,
                        reason: format!("no settings to register `{key}` into"),
                    });
                };
                settings
                    .integrations
                    .entry(key)
                    .or_insert_with(|| Value::Object(JsonObject::new()));
            }
        }
        Ok(next)
    }
}

/// Identity slice.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub anonymous_id: String,
    pub user_id: Option<String>,
    pub traits: JsonObject,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self {
            anonymous_id: Uuid::new_v4().to_string(),
            user_id: None,
            traits: JsonObject::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UserInfoAction {
    /// Forget the user and mint a new anonymous id.
    Reset,
    SetUserId(String),
    SetAnonymousId(String),
    SetTraits(JsonObject),
    Identify { user_id: String, traits: JsonObject },
}

impl State for UserInfo {
    type Action = UserInfoAction;

    const NAME: &'static str = "user_info";

    fn reduce(&self, action: UserInfoAction) -> Result<Self, StoreError> {
        let mut next = self.clone();
        match action {
            UserInfoAction::Reset => {
                next = UserInfo::default();
            }
            UserInfoAction::SetUserId(user_id) => {
                next.user_id = Some(non_empty("user id", user_id)?);
            }
            UserInfoAction::SetAnonymousId(anonymous_id) => {
                next.anonymous_id = non_empty("anonymous id", anonymous_id)?;
            }
            UserInfoAction::SetTraits(traits) => {
                next.traits = traits;
            }
            UserInfoAction::Identify { user_id, traits } => {
                next.user_id = Some(non_empty("user id", user_id)?);
                next.traits = traits;
            }
        }
        Ok(next)
    }
}

fn non_empty(what: &str, value: String) -> Result<String, StoreError> {
    if value.trim().is_empty() {
        Err(StoreError::ActionRejected {
            slice: UserInfo::NAME,
            reason: format!("{what} must not be empty"),
        })
    } else {
        Ok(value)
    }
}
