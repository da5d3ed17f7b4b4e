use serde::{Deserialize, Serialize};

use crate::models::node_info::NodeSystemInfo;

/// 执行策略：作用于节点系统信息的谓词树
///
/// 队列在挑选分发目标时逐通道求值，不满足的通道跳过本轮。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum ExecutionPolicy {
    /// 节点线程数不小于给定值
    MinThreads(u32),
    /// 节点最大内存不小于给定值（MB）
    MinMemoryMb(u64),
    /// 主机名在给定集合内
    HostIn(Vec<String>),
    Not(Box<ExecutionPolicy>),
    And(Vec<ExecutionPolicy>),
    Or(Vec<ExecutionPolicy>),
}

impl ExecutionPolicy {
    pub fn evaluate(&self, info: &NodeSystemInfo) -> bool {
        match self {
            ExecutionPolicy::MinThreads(n) => info.threads >= *n,
            ExecutionPolicy::MinMemoryMb(n) => info.max_memory_mb >= *n,
            ExecutionPolicy::HostIn(hosts) => hosts.iter().any(|h| h == &info.host),
            ExecutionPolicy::Not(inner) => !inner.evaluate(info),
            ExecutionPolicy::And(all) => all.iter().all(|p| p.evaluate(info)),
            ExecutionPolicy::Or(any) => any.iter().any(|p| p.evaluate(info)),
        }
    }
}
