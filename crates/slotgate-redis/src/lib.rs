//! Redis backend for the shared slot store.
//!
//! Records are stored as JSON strings under `<prefix><record id>`. Every conditional
//! operation runs as a Lua script so it stays atomic across processes.
mod keys;
pub use keys::RedisKeys;

mod scripts;

mod settings;
pub use settings::RedisSettings;

mod store;
pub use store::RedisSlotStore;

/// Key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "slotgate:";
