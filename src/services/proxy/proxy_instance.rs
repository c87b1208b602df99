// 调试代理实例
//
// ProxyInstance 负责：
// - HTTP 服务器的启动和停止
// - 请求的接收和转发
// - 为每次交换构造 HttpFlow 并调用插件

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderName, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use super::utils::body::{box_body, full_body, BoxBody, BoxError};
use super::utils::{error_responses, loop_detector};
use crate::core::AppResult;
use crate::models::flow::{Flow, HttpFlow, RecordedRequest, RecordedResponse};
use crate::models::proxy_config::ProxyConfig;
use crate::services::addon::Addon;

/// 逐跳头部，不在代理两侧转发
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// 单个调试代理实例
pub struct ProxyInstance {
    config: Arc<ProxyConfig>,
    addon: Arc<dyn Addon>,
    client: reqwest::Client,
    server_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl ProxyInstance {
    pub fn new(config: ProxyConfig, addon: Arc<dyn Addon>) -> AppResult<Self> {
        let client = reqwest::Client::builder().no_proxy().build()?;

        Ok(Self {
            config: Arc::new(config),
            addon,
            client,
            server_handle: Arc::new(RwLock::new(None)),
        })
    }

    /// 启动代理服务，返回实际监听地址（端口配置为 0 时由系统分配）
    pub async fn start(&self) -> Result<SocketAddr> {
        {
            let handle = self.server_handle.read().await;
            if handle.is_some() {
                anyhow::bail!("代理实例已在运行");
            }
        }

        let config = &self.config;

        let addr = if config.allow_public {
            SocketAddr::from(([0, 0, 0, 0], config.port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], config.port))
        };

        let listener = TcpListener::bind(addr)
            .await
            .context(format!("绑定端口 {} 失败", config.port))?;
        let local_addr = listener.local_addr().context("读取监听地址失败")?;

        tracing::info!(
            addr = %local_addr,
            upstream = %config.upstream_base_url,
            "调试代理启动成功"
        );

        let config_clone = Arc::clone(&self.config);
        let addon_clone = Arc::clone(&self.addon);
        let client = self.client.clone();
        let own_port = local_addr.port();

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let config = Arc::clone(&config_clone);
                        let addon = Arc::clone(&addon_clone);
                        let client = client.clone();

                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let config = Arc::clone(&config);
                                let addon = Arc::clone(&addon);
                                let client = client.clone();
                                async move { handle_request(req, config, addon, client, own_port).await }
                            });

                            if let Err(err) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                tracing::error!(error = ?err, "处理连接失败");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "接受连接失败");
                    }
                }
            }
        });

        {
            let mut h = self.server_handle.write().await;
            *h = Some(handle);
        }

        Ok(local_addr)
    }

    /// 停止代理服务
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut h = self.server_handle.write().await;
            h.take()
        };

        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("调试代理已停止");
        }

        Ok(())
    }

}

async fn handle_request(
    req: Request<Incoming>,
    config: Arc<ProxyConfig>,
    addon: Arc<dyn Addon>,
    client: reqwest::Client,
    own_port: u16,
) -> Result<Response<BoxBody>, Infallible> {
    match handle_request_inner(req, config, addon, client, own_port).await {
        Ok(res) => Ok(res),
        Err(e) => {
            tracing::error!(error = ?e, "请求处理失败");
            Ok(error_responses::internal_error(&e.to_string()))
        }
    }
}

async fn handle_request_inner(
    req: Request<Incoming>,
    config: Arc<ProxyConfig>,
    addon: Arc<dyn Addon>,
    client: reqwest::Client,
    own_port: u16,
) -> Result<Response<BoxBody>> {
    let upstream_base = config.upstream_base_url.as_str();
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target_url = format!("{}{}", upstream_base.trim_end_matches('/'), path_and_query);

    if loop_detector::is_proxy_loop(&target_url, own_port) {
        tracing::warn!(target_url = %target_url, "检测到代理回环");
        return Ok(error_responses::proxy_loop_detected(upstream_base));
    }

    let body_bytes = if parts.method != Method::GET && parts.method != Method::HEAD {
        body.collect().await.context("读取请求体失败")?.to_bytes()
    } else {
        Bytes::new()
    };

    let mut flow = HttpFlow::new(RecordedRequest {
        method: parts.method.clone(),
        url: target_url.clone(),
        headers: parts.headers.clone(),
        body: body_bytes.clone(),
    });
    addon.request(&flow);

    tracing::debug!(
        method = %parts.method,
        target_url = %target_url,
        "代理请求"
    );

    let mut upstream_req = client.request(parts.method.clone(), &target_url);
    for (name, value) in parts.headers.iter() {
        if skip_request_header(name) {
            continue;
        }
        upstream_req = upstream_req.header(name, value);
    }
    if !body_bytes.is_empty() {
        upstream_req = upstream_req.body(body_bytes);
    }

    let upstream_res = match upstream_req.send().await {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(target_url = %target_url, error = %e, "上游请求失败");
            return Ok(error_responses::bad_gateway(&e.to_string()));
        }
    };

    let status = StatusCode::from_u16(upstream_res.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = upstream_res.headers().clone();

    let mut response = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        response = response.header(name, value);
    }

    if is_event_stream(&headers) {
        tracing::debug!(flow = %flow.id(), "SSE 流式响应");

        let (tx, rx) = mpsc::channel::<Result<Bytes, reqwest::Error>>(64);

        // 边转发边缓冲，流结束后把完整响应体交给插件
        tokio::spawn(async move {
            let mut collected = BytesMut::new();
            let mut stream = Box::pin(upstream_res.bytes_stream());
            let mut client_gone = false;

            while let Some(item) = stream.next().await {
                if let Ok(chunk) = &item {
                    collected.extend_from_slice(chunk);
                }
                let failed = item.is_err();
                if !client_gone && tx.send(item).await.is_err() {
                    client_gone = true;
                    tracing::debug!("客户端已断开，继续读取上游以完成记录");
                }
                if failed {
                    break;
                }
            }
            drop(tx);

            flow.set_response(RecordedResponse {
                status,
                headers,
                body: collected.freeze(),
            });
            run_response_hook(addon, flow).await;
        });

        let frames = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .map(|item| item.map(Frame::data).map_err(|e| Box::new(e) as BoxError));

        response
            .body(box_body(StreamBody::new(frames)))
            .context("构建 SSE 响应失败")
    } else {
        let body_bytes = upstream_res.bytes().await.context("读取响应体失败")?;

        flow.set_response(RecordedResponse {
            status,
            headers,
            body: body_bytes.clone(),
        });
        run_response_hook(addon, flow).await;

        response
            .body(full_body(body_bytes))
            .context("构建响应失败")
    }
}

/// 响应回调可能落盘，放到阻塞线程池执行，避免占用 tokio worker
async fn run_response_hook(addon: Arc<dyn Addon>, flow: HttpFlow) {
    if let Err(e) = tokio::task::spawn_blocking(move || addon.response(&flow)).await {
        tracing::error!(error = ?e, "响应插件执行失败");
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// 上游请求由 reqwest 重新生成 Host / Content-Length；
/// 不转发 Accept-Encoding，保证响应体可直接解码
fn skip_request_header(name: &HeaderName) -> bool {
    is_hop_by_hop(name) || name == HOST || name == CONTENT_LENGTH || name == ACCEPT_ENCODING
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proxy_config::ClassifierConfig;
    use crate::services::codex_inspector::{iter_sse_payloads, CodexSseLogger};
    use http_body_util::Full;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SSE_BODY: &str = concat!(
        "data: {\"type\":\"response.created\",\"response\":{\"model\":\"gpt-5-codex\",\"reasoning\":{\"effort\":\"high\"}}}\n\n",
        "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hello\"}\n\n",
        "data: [DONE]\n\n",
    );

    /// 记录插件收到的回调
    struct RecordingAddon {
        requests: Mutex<Vec<(Method, String, String)>>,
        responses: mpsc::UnboundedSender<(u16, String, String)>,
    }

    impl Addon for RecordingAddon {
        fn request(&self, flow: &dyn Flow) {
            let request = flow.request();
            self.requests.lock().unwrap().push((
                request.method().clone(),
                request.pretty_url().to_string(),
                request.text().unwrap_or_default(),
            ));
        }

        fn response(&self, flow: &dyn Flow) {
            if let Some(response) = flow.response() {
                let _ = self.responses.send((
                    response.status().as_u16(),
                    flow.request().pretty_url().to_string(),
                    response.text_lossy(),
                ));
            }
        }
    }

    async fn spawn_upstream(content_type: &'static str, body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| async move {
                        let _ = req.into_body().collect().await;
                        Ok::<_, Infallible>(
                            Response::builder()
                                .header("content-type", content_type)
                                .body(Full::new(Bytes::from_static(body.as_bytes())))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }

    fn test_config(upstream: SocketAddr) -> ProxyConfig {
        ProxyConfig {
            port: 0,
            upstream_base_url: format!("http://{upstream}"),
            classifier: ClassifierConfig {
                host_marker: "127.0.0.1".to_string(),
                path_marker: "/backend-api/codex".to_string(),
            },
            body_dump_path: None,
            ..ProxyConfig::default()
        }
    }

    fn test_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn recording_addon() -> (
        Arc<RecordingAddon>,
        mpsc::UnboundedReceiver<(u16, String, String)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addon = Arc::new(RecordingAddon {
            requests: Mutex::new(Vec::new()),
            responses: tx,
        });
        (addon, rx)
    }

    #[tokio::test]
    async fn test_sse_flow_reaches_addon() {
        let upstream = spawn_upstream("text/event-stream", SSE_BODY).await;
        let (addon, mut responses) = recording_addon();
        let proxy = ProxyInstance::new(test_config(upstream), addon.clone()).unwrap();
        let addr = proxy.start().await.unwrap();

        let res = test_client()
            .post(format!("http://{addr}/backend-api/codex/responses"))
            .body(r#"{"prompt_cache_key":"abc","stream":true}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.text().await.unwrap(), SSE_BODY);

        let (status, url, body) = tokio::time::timeout(Duration::from_secs(5), responses.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, 200);
        assert_eq!(url, format!("http://{upstream}/backend-api/codex/responses"));
        assert_eq!(body, SSE_BODY);

        let requests = addon.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Method::POST);
        assert_eq!(requests[0].2, r#"{"prompt_cache_key":"abc","stream":true}"#);

        proxy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_json_response_passthrough() {
        let upstream = spawn_upstream("application/json", r#"{"ok":true}"#).await;
        let (addon, mut responses) = recording_addon();
        let proxy = ProxyInstance::new(test_config(upstream), addon).unwrap();
        let addr = proxy.start().await.unwrap();

        let res = test_client()
            .get(format!("http://{addr}/backend-api/codex/models?client_version=1"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.text().await.unwrap(), r#"{"ok":true}"#);

        let (_, url, body) = tokio::time::timeout(Duration::from_secs(5), responses.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(url.ends_with("/backend-api/codex/models?client_version=1"));
        assert_eq!(body, r#"{"ok":true}"#);

        proxy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_codex_logger_as_addon() {
        let upstream = spawn_upstream("text/event-stream", SSE_BODY).await;
        let dir = tempfile::TempDir::new().unwrap();
        let dump = dir.path().join("last_body.txt");
        let mut config = test_config(upstream);
        config.body_dump_path = Some(dump.clone());

        let addon = Arc::new(CodexSseLogger::from_config(&config));
        let proxy = ProxyInstance::new(config, addon).unwrap();
        let addr = proxy.start().await.unwrap();

        let res = test_client()
            .post(format!("http://{addr}/backend-api/codex/responses"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(res.text().await.unwrap(), SSE_BODY);

        // 插件在流结束后的后台任务中落盘
        let mut dumped = String::new();
        for _ in 0..50 {
            if let Ok(content) = std::fs::read_to_string(&dump) {
                if content == SSE_BODY {
                    dumped = content;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(dumped, SSE_BODY);
        assert_eq!(iter_sse_payloads(&dumped).count(), 2);

        proxy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_upstream_unreachable_returns_bad_gateway() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream = closed.local_addr().unwrap();
        drop(closed);

        let (addon, _responses) = recording_addon();
        let proxy = ProxyInstance::new(test_config(upstream), addon.clone()).unwrap();
        let addr = proxy.start().await.unwrap();

        let res = test_client()
            .post(format!("http://{addr}/backend-api/codex/responses"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 502);
        assert_eq!(addon.requests.lock().unwrap().len(), 1);

        proxy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_proxy_loop_rejected() {
        // 先占用一个空闲端口，再让代理监听该端口并把上游指向自身
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let own = reserved.local_addr().unwrap();
        drop(reserved);

        let (addon, _responses) = recording_addon();
        let mut config = test_config(own);
        config.port = own.port();
        let proxy = ProxyInstance::new(config, addon.clone()).unwrap();
        let addr = proxy.start().await.unwrap();
        assert_eq!(addr, own);

        let res = test_client()
            .get(format!("http://{addr}/backend-api/codex/responses"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 508);
        assert!(addon.requests.lock().unwrap().is_empty());

        proxy.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (addon, _responses) = recording_addon();
        let upstream: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let proxy = ProxyInstance::new(test_config(upstream), addon).unwrap();

        proxy.start().await.unwrap();
        assert!(proxy.start().await.is_err());
        proxy.stop().await.unwrap();

        // 停止后可以重新启动
        proxy.start().await.unwrap();
        proxy.stop().await.unwrap();
    }

    /// 第一次响应回调会阻塞，直到测试放行
    struct GatedAddon {
        entered: AtomicBool,
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl Addon for GatedAddon {
        fn response(&self, _flow: &dyn Flow) {
            if !self.entered.swap(true, Ordering::SeqCst) {
                let _ = self
                    .gate
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5));
            }
        }
    }

    #[tokio::test]
    async fn test_slow_response_hook_does_not_stall_other_requests() {
        let upstream = spawn_upstream("application/json", r#"{"ok":true}"#).await;
        let (release, gate) = std::sync::mpsc::channel();
        let addon = Arc::new(GatedAddon {
            entered: AtomicBool::new(false),
            gate: Mutex::new(gate),
        });
        let proxy = ProxyInstance::new(test_config(upstream), addon.clone()).unwrap();
        let addr = proxy.start().await.unwrap();
        let url = format!("http://{addr}/backend-api/codex/models");

        let first = tokio::spawn({
            let url = url.clone();
            async move { test_client().get(url).send().await.unwrap().status().as_u16() }
        });
        for _ in 0..250 {
            if addon.entered.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(addon.entered.load(Ordering::SeqCst));

        // 第一个回调仍被阻塞时，第二个请求必须能正常完成
        let second = tokio::time::timeout(Duration::from_secs(3), test_client().get(&url).send())
            .await
            .expect("second request stalled behind blocked hook")
            .unwrap();
        assert_eq!(second.status().as_u16(), 200);

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 200);

        proxy.stop().await.unwrap();
    }

    #[test]
    fn test_header_filters() {
        assert!(skip_request_header(&HOST));
        assert!(skip_request_header(&ACCEPT_ENCODING));
        assert!(skip_request_header(&HeaderName::from_static("connection")));
        assert!(!skip_request_header(&CONTENT_TYPE));
        assert!(!skip_request_header(&HeaderName::from_static("authorization")));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "text/event-stream; charset=utf-8".parse().unwrap());
        assert!(is_event_stream(&headers));
        assert!(!is_event_stream(&HeaderMap::new()));
    }
}
