//! Hot-reloadable gate configuration.
mod error;
pub use error::{SettingsError, SettingsResult};

mod source;
pub use source::{SettingsSource, StaticSettings, TomlFileSettings};

mod provider;
pub use provider::SettingsProvider;
