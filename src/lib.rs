//! Client-side analytics kernel.
//!
//! Three parts carry the weight:
//! - [`Store`]: versioned state slices, mutated only through reducer actions.
//! - [`SettingsRefresher`]: fetch -> parse -> commit of remote settings, with
//!   I/O kept off the commit path.
//! - [`Timeline`]: ordered plugin chain notified on every settings commit.
//!
//! [`Pipeline`] wires them together for a host application.

pub mod config;
pub mod kernel;
pub mod pipeline;
pub mod plugins;
pub mod services;

pub use config::{Configuration, ExecutionContexts};
pub use kernel::event::{Event, EventType};
pub use kernel::plugin::{Plugin, PluginContext, PluginKind, UpdateType};
pub use kernel::settings::{JsonObject, Settings, SettingsError};
pub use kernel::state::{System, SystemAction, UserInfo, UserInfoAction};
pub use kernel::store::{Snapshot, State, Store, StoreError, Subscription};
pub use kernel::timeline::{PluginId, Timeline};
pub use pipeline::Pipeline;
pub use services::settings::client::{FetchError, HttpClient, SettingsClient, SettingsResponse};
pub use services::settings::refresher::{RefreshError, SettingsRefresher};
