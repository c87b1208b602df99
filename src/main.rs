use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use codex_sse_logger::core::{init_logger, AppResult, LogFormat, LogLevel};
use codex_sse_logger::models::ProxyConfig;
use codex_sse_logger::services::{CodexSseLogger, ProxyInstance};

const APP_DIR: &str = "codex-sse-logger";
const CONFIG_FILE: &str = "config.toml";

/// Codex SSE 调试代理：转发流量并记录模型、推理强度与缓存键
#[derive(Parser, Debug)]
#[command(name = "codex-sse-logger")]
#[command(version)]
#[command(about = "Local debug proxy that logs Codex SSE model and reasoning fields")]
struct Args {
    /// 配置文件路径（默认 <config_dir>/codex-sse-logger/config.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 上游地址
    #[arg(long)]
    upstream: Option<String>,

    /// 监听 0.0.0.0
    #[arg(long)]
    allow_public: bool,

    /// 关闭响应体落盘
    #[arg(long)]
    no_body_dump: bool,

    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE)))
    }

    /// 合并顺序：默认值 → 配置文件 → 命令行参数
    fn resolve_config(&self) -> AppResult<ProxyConfig> {
        let mut config = match self.config_path() {
            Some(path) => ProxyConfig::load(&path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(upstream) = &self.upstream {
            config.upstream_base_url = upstream.clone();
        }
        if self.allow_public {
            config.allow_public = true;
        }
        if self.no_body_dump {
            config.body_dump_path = None;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Some(file) = &self.log_file {
            config.log.file = Some(file.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.resolve_config().context("加载配置失败")?;
    let _log_guard = init_logger(&config.log).context("初始化日志失败")?;

    let addon = Arc::new(CodexSseLogger::from_config(&config));
    let proxy = ProxyInstance::new(config, addon).context("创建代理实例失败")?;
    let addr = proxy.start().await?;

    tracing::info!(
        base_url = %format!("http://{addr}"),
        "将 Codex 的上游地址指向该代理，按 Ctrl+C 退出"
    );

    tokio::signal::ctrl_c().await.context("等待退出信号失败")?;
    proxy.stop().await?;
    Ok(())
}
