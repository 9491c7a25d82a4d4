//! Common utilities and shared types for ecolearn.
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based identifiers and pending-row placeholders via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use ecolearn_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id = IdGenerator::new().generate();
//!     println!("{id} with timeout {:?}", config.sync.request_timeout());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::{
    Config, DatabaseConfig, LogFormat, LoggingConfig, RedisConfig, StoreBackend, StoreConfig,
    SyncConfig,
};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
