pub mod flow;
pub mod proxy_config;

pub use flow::{Flow, FlowRequest, FlowResponse, HttpFlow, RecordedRequest, RecordedResponse};
pub use proxy_config::{ClassifierConfig, ProxyConfig};
