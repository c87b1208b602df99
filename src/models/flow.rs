// 代理流量记录
//
// Flow 是宿主持有的一次 HTTP 交换；插件只通过只读访问器读取，不做任何修改

use std::borrow::Cow;
use std::io::Read;

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use hyper::header::CONTENT_ENCODING;
use hyper::{HeaderMap, Method, StatusCode};

use crate::core::AppResult;

/// 宿主注入的流量能力接口
pub trait Flow {
    /// 流量唯一标识
    fn id(&self) -> &str;

    fn request(&self) -> &dyn FlowRequest;

    /// 上游尚未响应（或连接失败）时为 None
    fn response(&self) -> Option<&dyn FlowResponse>;
}

pub trait FlowRequest {
    fn method(&self) -> &Method;

    /// 完整 URL（scheme + host + path + query）
    fn pretty_url(&self) -> &str;

    fn headers(&self) -> &HeaderMap;

    /// 严格解码请求体：解压失败或非 UTF-8 时返回错误
    fn text(&self) -> AppResult<String>;
}

pub trait FlowResponse {
    fn status(&self) -> StatusCode;

    fn headers(&self) -> &HeaderMap;

    /// 宽松解码响应体：无法解压时使用原始字节，非法 UTF-8 替换为 U+FFFD
    fn text_lossy(&self) -> String;
}

/// 已缓冲的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// 已缓冲的响应
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// 宿主侧的流量记录
#[derive(Debug, Clone)]
pub struct HttpFlow {
    id: String,
    request: RecordedRequest,
    response: Option<RecordedResponse>,
}

impl HttpFlow {
    /// 新建流量（自动分配 UUID）
    pub fn new(request: RecordedRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            response: None,
        }
    }

    pub fn with_id(id: impl Into<String>, request: RecordedRequest) -> Self {
        Self {
            id: id.into(),
            request,
            response: None,
        }
    }

    /// 上游响应完成后由宿主写入
    pub fn set_response(&mut self, response: RecordedResponse) {
        self.response = Some(response);
    }
}

impl Flow for HttpFlow {
    fn id(&self) -> &str {
        &self.id
    }

    fn request(&self) -> &dyn FlowRequest {
        &self.request
    }

    fn response(&self) -> Option<&dyn FlowResponse> {
        self.response.as_ref().map(|r| r as &dyn FlowResponse)
    }
}

impl FlowRequest for RecordedRequest {
    fn method(&self) -> &Method {
        &self.method
    }

    fn pretty_url(&self) -> &str {
        &self.url
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn text(&self) -> AppResult<String> {
        let decoded = decode_content(&self.headers, &self.body)?;
        Ok(String::from_utf8(decoded.into_owned())?)
    }
}

impl FlowResponse for RecordedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn text_lossy(&self) -> String {
        let decoded =
            decode_content(&self.headers, &self.body).unwrap_or(Cow::Borrowed(&self.body[..]));
        String::from_utf8_lossy(&decoded).into_owned()
    }
}

/// 按 content-encoding 解压消息体
///
/// 仅支持 gzip / deflate，其余编码原样返回。
fn decode_content<'a>(headers: &HeaderMap, body: &'a [u8]) -> std::io::Result<Cow<'a, [u8]>> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let mut decoded = Vec::new();
    match encoding.as_str() {
        "gzip" | "x-gzip" => {
            GzDecoder::new(body).read_to_end(&mut decoded)?;
        }
        "deflate" => {
            ZlibDecoder::new(body).read_to_end(&mut decoded)?;
        }
        _ => return Ok(Cow::Borrowed(body)),
    }
    Ok(Cow::Owned(decoded))
}
