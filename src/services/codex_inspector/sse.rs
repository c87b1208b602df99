// SSE 响应体解析
//
// 职责：把已缓冲的完整 SSE 响应体拆成 (event_type, payload) 序列，永不 panic

use serde_json::{Map, Value};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// 单个 SSE 事件：事件类型 + 已解码的 JSON 对象
pub type SsePayload = (String, Map<String, Value>);

/// 惰性的 SSE 负载迭代器
///
/// 只借用响应体，克隆即可从当前位置重新开始遍历。
///
/// SSE 格式示例：
/// ```text
/// data: {"type":"response.created","response":{"model":"gpt-5-codex"}}
///
/// data: [DONE]
/// ```
#[derive(Debug, Clone)]
pub struct SsePayloads<'a> {
    rest: &'a str,
}

pub fn iter_sse_payloads(body: &str) -> SsePayloads<'_> {
    SsePayloads { rest: body }
}

impl<'a> SsePayloads<'a> {
    /// 取下一行，`\r\n`、`\n`、`\r` 均视为行结束
    ///
    /// `\r\n` 会多切出一个空行，空行本身不含 `data:`，不影响结果。
    fn next_line(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.find(|c: char| c == '\r' || c == '\n') {
            Some(idx) => {
                let line = &self.rest[..idx];
                self.rest = &self.rest[idx + 1..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = "";
                Some(line)
            }
        }
    }
}

impl<'a> Iterator for SsePayloads<'a> {
    type Item = SsePayload;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(raw_line) = self.next_line() {
            let Some(chunk) = data_chunk(raw_line) else {
                continue;
            };

            match serde_json::from_str::<Value>(chunk) {
                Ok(Value::Object(payload)) => {
                    let event_type = event_type_of(&payload);
                    return Some((event_type, payload));
                }
                Ok(_) => {
                    tracing::warn!(chunk = chunk, "SSE 数据块不是 JSON 对象，已跳过");
                }
                Err(e) => {
                    tracing::warn!(error = %e, chunk = chunk, "SSE 数据块解码失败");
                }
            }
        }
        None
    }
}

/// 提取 `data:` 行的负载文本，过滤空负载和结束标记
fn data_chunk(raw_line: &str) -> Option<&str> {
    let chunk = raw_line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if chunk.is_empty() || chunk == DONE_SENTINEL {
        return None;
    }
    Some(chunk)
}

/// 事件类型：`type` 缺失或为 null 时统一为 `unknown`（null 不会原样输出为 `null`），
/// 其他非字符串值按 JSON 文本输出
fn event_type_of(payload: &Map<String, Value>) -> String {
    match payload.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => UNKNOWN_EVENT_TYPE.to_string(),
        Some(other) => other.to_string(),
    }
}
