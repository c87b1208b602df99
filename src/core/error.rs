use std::fmt::Display;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("UTF-8 解码错误: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),
    #[error("配置错误: {0}")]
    Config(String),
    #[error("日志初始化失败: {0}")]
    Logger(String),
}

impl AppError {
    pub fn config<E: Display>(err: E) -> Self {
        Self::Config(err.to_string())
    }

    pub fn logger<E: Display>(err: E) -> Self {
        Self::Logger(err.to_string())
    }
}
