// 调试代理宿主
//
// 本地反向代理：转发到上游并为每次交换构造 Flow，驱动插件回调

mod proxy_instance;
pub mod utils;

pub use proxy_instance::ProxyInstance;
