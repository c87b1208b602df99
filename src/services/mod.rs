pub mod addon;
pub mod codex_inspector;
pub mod proxy;

pub use addon::Addon;
pub use codex_inspector::CodexSseLogger;
pub use proxy::ProxyInstance;
