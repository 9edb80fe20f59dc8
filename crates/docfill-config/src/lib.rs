//! Configuration, paths, and logging setup for the docfill client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, SessionConfig, DEFAULT_API_BASE_URL, DEFAULT_LOCKOUT_DURATION_SECS, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_LOGIN_ATTEMPTS, DEFAULT_REFRESH_BUFFER_SECS, DEFAULT_STORAGE_KEY,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogFormat};
pub use paths::Paths;
