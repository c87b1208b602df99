// 调试代理配置
//
// 从 TOML 文件加载，缺失的文件或字段均使用默认值

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{AppError, AppResult, LogConfig};

pub const DEFAULT_PORT: u16 = 8788;
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://chatgpt.com";
pub const DEFAULT_HOST_MARKER: &str = "chatgpt.com";
pub const DEFAULT_PATH_MARKER: &str = "/backend-api/codex";
const DEFAULT_BODY_DUMP_FILE: &str = "codex_sse_last_body.txt";

/// Codex 流量识别规则（URL 子串，区分大小写）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub host_marker: String,
    pub path_marker: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            host_marker: DEFAULT_HOST_MARKER.to_string(),
            path_marker: DEFAULT_PATH_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub port: u16,
    /// true 时监听 0.0.0.0，否则仅 127.0.0.1
    pub allow_public: bool,
    pub upstream_base_url: String,
    pub classifier: ClassifierConfig,
    /// 最近一次 Codex 响应体的落盘路径；配置为空字符串时关闭
    pub body_dump_path: Option<PathBuf>,
    pub log: LogConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            allow_public: false,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            classifier: ClassifierConfig::default(),
            body_dump_path: Some(default_body_dump_path()),
            log: LogConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// 读取配置文件；文件不存在或内容为空时返回默认配置
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config = if content.trim().is_empty() {
            Self::default()
        } else {
            toml::from_str::<Self>(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let parsed = url::Url::parse(&self.upstream_base_url).map_err(|e| {
            AppError::config(format!("上游地址无效 {}: {e}", self.upstream_base_url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::config(format!(
                "上游地址仅支持 http/https: {}",
                self.upstream_base_url
            )));
        }
        if self.classifier.host_marker.is_empty() || self.classifier.path_marker.is_empty() {
            return Err(AppError::config("流量识别规则不能为空"));
        }
        Ok(())
    }

    /// 生效的落盘路径（空路径视为关闭）
    pub fn effective_body_dump_path(&self) -> Option<&Path> {
        self.body_dump_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

pub fn default_body_dump_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_BODY_DUMP_FILE)
}
