// Codex SSE 调试插件
//
// 职责：
// - 识别 Codex 后端流量
// - 记录出站请求的缓存键与字段
// - 解析 SSE 响应体，提取模型与推理强度

mod classifier;
mod extractor;
mod inspector;
mod sse;

pub use classifier::FlowClassifier;
pub use extractor::{extract_model, extract_reasoning_effort, ModelInfo};
pub use inspector::{CodexSseLogger, ModelObservation, RequestSummary, ResponseSummary};
pub use sse::{iter_sse_payloads, SsePayload, SsePayloads, UNKNOWN_EVENT_TYPE};
