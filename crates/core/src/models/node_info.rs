use serde::{Deserialize, Serialize};

/// 节点握手时上报的系统信息
///
/// 执行策略以它为输入筛选通道；node_threads 算法直接用
/// `threads` 推导任务束大小。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSystemInfo {
    pub node_uuid: String,
    pub host: String,
    /// 节点配置的任务处理线程数
    pub threads: u32,
    pub max_memory_mb: u64,
    pub available_processors: u32,
}

impl NodeSystemInfo {
    pub fn new(node_uuid: impl Into<String>, host: impl Into<String>, threads: u32) -> Self {
        Self {
            node_uuid: node_uuid.into(),
            host: host.into(),
            threads,
            max_memory_mb: 0,
            available_processors: threads,
        }
    }
}
