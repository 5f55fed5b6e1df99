mod error;
pub use error::{SyncError, Result};

pub mod config;
pub use config::Config;

pub mod registry;
pub mod sync;
