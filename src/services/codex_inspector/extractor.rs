// Codex SSE 负载字段提取
//
// 只做查找不做校验：任何一步缺失都返回 None

use serde_json::{Map, Value};

/// 从单个 SSE 负载中提取的模型信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInfo {
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
}

impl ModelInfo {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            model: extract_model(payload),
            reasoning_effort: extract_reasoning_effort(payload),
        }
    }
}

/// 提取模型名称
///
/// 优先顶层 `model`，缺失或为空时回退到 `response.model`。
pub fn extract_model(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("model")
        .and_then(text_value)
        .or_else(|| response_object(payload)?.get("model").and_then(text_value))
}

/// 提取推理强度
///
/// 查找顺序：`response.reasoning` → `response.metadata.reasoning`，
/// 命中的对象内再取 `effort`，回退 `effort_level`。
pub fn extract_reasoning_effort(payload: &Map<String, Value>) -> Option<String> {
    let response = response_object(payload)?;

    let reasoning = response
        .get("reasoning")
        .filter(|v| is_present(v))
        .or_else(|| {
            response
                .get("metadata")?
                .as_object()?
                .get("reasoning")
                .filter(|v| is_present(v))
        })?
        .as_object()?;

    reasoning
        .get("effort")
        .and_then(text_value)
        .or_else(|| reasoning.get("effort_level").and_then(text_value))
}

fn response_object(payload: &Map<String, Value>) -> Option<&Map<String, Value>> {
    payload.get("response")?.as_object()
}

/// null、false、0、空字符串、空数组、空对象均视为缺失
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// 把存在的标量值转为文本（字符串原样返回，其余按 JSON 文本）
fn text_value(value: &Value) -> Option<String> {
    if !is_present(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
