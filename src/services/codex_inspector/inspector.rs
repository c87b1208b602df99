// Codex 请求/响应检查器
//
// 失败放行策略：本插件只做诊断，任何解析或落盘失败都不能影响代理转发。
// - 请求体无法解码或不是 JSON 对象：静默跳过
// - 单行 SSE 解码失败：记录 warn 后继续
// - 响应体落盘失败：静默忽略

use std::fs;
use std::path::{Path, PathBuf};

use hyper::Method;
use serde_json::Value;

use super::classifier::FlowClassifier;
use super::extractor::ModelInfo;
use super::sse::iter_sse_payloads;
use crate::models::flow::Flow;
use crate::models::proxy_config::ProxyConfig;
use crate::services::addon::Addon;

/// 出站 Codex 请求的调试摘要
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    pub flow_id: String,
    pub prompt_cache_key: Option<Value>,
    pub include: Option<Value>,
    /// 请求体顶层字段名（保持原始顺序）
    pub keys: Vec<String>,
}

/// 每个响应都会记录的基础摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    pub flow_id: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// SSE 事件中观测到的模型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelObservation {
    pub flow_id: String,
    pub event_type: String,
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub url: String,
}

/// Codex SSE 调试日志插件
#[derive(Debug, Clone, Default)]
pub struct CodexSseLogger {
    classifier: FlowClassifier,
    body_dump_path: Option<PathBuf>,
}

impl CodexSseLogger {
    pub fn new(classifier: FlowClassifier, body_dump_path: Option<PathBuf>) -> Self {
        Self {
            classifier,
            body_dump_path,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            FlowClassifier::from(&config.classifier),
            config.effective_body_dump_path().map(Path::to_path_buf),
        )
    }

    pub fn is_codex(&self, flow: &dyn Flow) -> bool {
        self.classifier.matches(flow.request().pretty_url())
    }

    /// 检查出站请求：仅处理 Codex 的 POST 请求，请求体必须是 JSON 对象
    pub fn inspect_request(&self, flow: &dyn Flow) -> Option<RequestSummary> {
        if !self.is_codex(flow) || flow.request().method() != Method::POST {
            return None;
        }

        let body = flow.request().text().ok()?;
        let payload = match serde_json::from_str::<Value>(&body).ok()? {
            Value::Object(map) => map,
            _ => return None,
        };

        let summary = RequestSummary {
            flow_id: flow.id().to_string(),
            prompt_cache_key: payload.get("prompt_cache_key").cloned(),
            include: payload.get("include").cloned(),
            keys: payload.keys().cloned().collect(),
        };

        tracing::info!(
            flow = %summary.flow_id,
            prompt_cache_key = %display_json(summary.prompt_cache_key.as_ref()),
            include = %display_json(summary.include.as_ref()),
            keys = ?summary.keys,
            "codex_request"
        );

        Some(summary)
    }

    /// 记录响应基础信息（不区分是否为 Codex 流量）
    pub fn summarize_response(&self, flow: &dyn Flow) -> Option<ResponseSummary> {
        let response = flow.response()?;

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let summary = ResponseSummary {
            flow_id: flow.id().to_string(),
            status: response.status().as_u16(),
            headers,
        };

        tracing::info!(
            flow = %summary.flow_id,
            status = summary.status,
            headers = ?summary.headers,
            "codex_response"
        );

        Some(summary)
    }

    /// 解析 Codex 响应体中的模型与推理强度
    pub fn inspect_response(&self, flow: &dyn Flow) -> Vec<ModelObservation> {
        let Some(response) = flow.response() else {
            return Vec::new();
        };
        if !self.is_codex(flow) {
            return Vec::new();
        }

        let body = response.text_lossy();
        if let Some(path) = &self.body_dump_path {
            dump_body(path, &body);
        }

        let url = flow.request().pretty_url();
        let mut observations = Vec::new();

        for (event_type, payload) in iter_sse_payloads(&body) {
            let info = ModelInfo::from_payload(&payload);
            let Some(model) = info.model else {
                continue;
            };

            tracing::info!(
                flow = %flow.id(),
                event = %event_type,
                model = %model,
                reasoning = info.reasoning_effort.as_deref(),
                url = %url,
                "codex_sse_model"
            );

            observations.push(ModelObservation {
                flow_id: flow.id().to_string(),
                event_type,
                model,
                reasoning_effort: info.reasoning_effort,
                url: url.to_string(),
            });
        }

        observations
    }
}

impl Addon for CodexSseLogger {
    fn request(&self, flow: &dyn Flow) {
        self.inspect_request(flow);
    }

    fn response(&self, flow: &dyn Flow) {
        if self.summarize_response(flow).is_some() {
            self.inspect_response(flow);
        }
    }
}

/// 覆盖写入最近一次响应体，失败静默忽略
fn dump_body(path: &Path, body: &str) {
    let _ = fs::write(path, body);
}

/// 字符串原样输出，其余值按 JSON 文本输出，缺失为 null
fn display_json(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}
