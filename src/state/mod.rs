pub mod group_config;
pub mod persistent_store;

pub use group_config::GroupConfig;
pub use persistent_store::{create_shared_store, PersistentStore, SharedStore};
