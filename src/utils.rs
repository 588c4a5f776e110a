pub mod error;
pub mod logging;

pub use error::{Result, WatcherError};
pub use logging::{LogLevel, init_logging};
