pub mod event;
pub mod plugin;
pub mod settings;
pub mod state;
pub mod store;
pub mod timeline;
