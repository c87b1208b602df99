// 代理自身产生的错误响应（JSON 格式）

use hyper::{Response, StatusCode};

use super::body::{full_body, BoxBody};

fn json_error(status: StatusCode, error_type: &str, message: &str) -> Response<BoxBody> {
    let payload = serde_json::json!({
        "type": "error",
        "error": {
            "type": error_type,
            "message": message,
        }
    });

    let mut response = Response::new(full_body(payload.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

pub fn internal_error(detail: &str) -> Response<BoxBody> {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "proxy_error", detail)
}

pub fn bad_gateway(detail: &str) -> Response<BoxBody> {
    json_error(
        StatusCode::BAD_GATEWAY,
        "upstream_error",
        &format!("上游请求失败: {detail}"),
    )
}

pub fn proxy_loop_detected(upstream: &str) -> Response<BoxBody> {
    json_error(
        StatusCode::LOOP_DETECTED,
        "proxy_loop",
        &format!("上游地址指向代理自身: {upstream}"),
    )
}
