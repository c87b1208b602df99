pub mod error;
pub mod logger;

// 导出核心类型
pub use error::{AppError, AppResult};
pub use logger::{init_logger, LogConfig, LogFormat, LogLevel};
