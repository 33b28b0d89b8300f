//! The persisted users/groups/settings store.

pub mod store;

pub use store::{ConfigDocument, ConfigError, ListenerConfig, Store};
