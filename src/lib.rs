pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod sync;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use error::SyncError;
pub use sync::PermissionSyncManager;
