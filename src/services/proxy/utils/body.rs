use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 代理响应统一使用的 body 类型（流式与非流式共用）
pub type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn box_body<B>(body: B) -> BoxBody
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    box_body(Full::new(data.into()))
}
