pub mod broadcast;
pub mod collections;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod notes;
pub mod state;
pub mod storage;
pub mod store;

pub use config::StoreConfig;
pub use error::{ExportError, ImportError, StoreError};
pub use state::AppState;
pub use storage::{MemoryBackend, SlotBackend, SqliteBackend};
pub use store::{Slot, Store, StoreOptions, Subscription, Update};

/// Installs the `env_logger` backend, defaulting to `info` unless `RUST_LOG` says otherwise.
/// Calling it more than once is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
