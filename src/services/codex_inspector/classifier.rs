// Codex 流量识别

use crate::models::proxy_config::ClassifierConfig;

/// 按 URL 子串判断流量是否属于 Codex 后端
///
/// 域名标记与路径标记必须同时命中，只命中其一不算。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowClassifier {
    host_marker: String,
    path_marker: String,
}

impl FlowClassifier {
    pub fn new(host_marker: impl Into<String>, path_marker: impl Into<String>) -> Self {
        Self {
            host_marker: host_marker.into(),
            path_marker: path_marker.into(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.host_marker) && url.contains(&self.path_marker)
    }
}

impl Default for FlowClassifier {
    fn default() -> Self {
        Self::from(&ClassifierConfig::default())
    }
}

impl From<&ClassifierConfig> for FlowClassifier {
    fn from(config: &ClassifierConfig) -> Self {
        Self::new(config.host_marker.clone(), config.path_marker.clone())
    }
}
