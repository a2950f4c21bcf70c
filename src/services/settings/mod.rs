pub mod client;
pub mod refresher;
