// 回环检测：上游地址指向代理自身监听端口时拒绝转发

use url::Url;

pub fn is_proxy_loop(target_url: &str, own_port: u16) -> bool {
    let Ok(url) = Url::parse(target_url) else {
        return false;
    };

    let is_local = match url.host_str() {
        Some(host) => matches!(
            host.trim_start_matches('[').trim_end_matches(']'),
            "localhost" | "127.0.0.1" | "0.0.0.0" | "::1"
        ),
        None => false,
    };

    is_local && url.port_or_known_default() == Some(own_port)
}
