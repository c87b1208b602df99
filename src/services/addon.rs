// 宿主回调接口
//
// 宿主在每个流量事件上同步调用插件；插件只读 Flow，不向宿主返回错误

use crate::models::flow::Flow;

/// 代理宿主加载的插件
///
/// 两个入口由宿主按流量调用一次：请求体缓冲完成后调用 `request`，
/// 响应体缓冲完成后调用 `response`。默认实现为空操作。
pub trait Addon: Send + Sync {
    fn request(&self, _flow: &dyn Flow) {}

    fn response(&self, _flow: &dyn Flow) {}
}
