use std::sync::Arc;

use grid_core::{GridError, GridResult};

/// 结果回送策略
///
/// 每次任务束结果归并后调用一次，决定这批结果是立即回送
/// 客户端还是继续缓冲。`returned_count` 是本批归并的任务数，
/// `remaining_before` 是归并前作业尚未解析的任务数。
pub trait SendResultsStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn should_send(&self, returned_count: usize, remaining_before: usize) -> bool;
}

/// 每个节点返回即回送
pub struct SendNodeResults;

impl SendResultsStrategy for SendNodeResults {
    fn name(&self) -> &'static str {
        "node"
    }

    fn should_send(&self, _returned_count: usize, _remaining_before: usize) -> bool {
        true
    }
}

/// 缓冲到作业全部解析后一次性回送
pub struct SendAllResults;

impl SendResultsStrategy for SendAllResults {
    fn name(&self) -> &'static str {
        "all"
    }

    fn should_send(&self, returned_count: usize, remaining_before: usize) -> bool {
        returned_count == remaining_before
    }
}

/// 按配置名解析策略，未知名称是配置错误
pub fn resolve(name: &str) -> GridResult<Arc<dyn SendResultsStrategy>> {
    match name {
        "node" => Ok(Arc::new(SendNodeResults)),
        "all" => Ok(Arc::new(SendAllResults)),
        other => Err(GridError::Configuration(format!(
            "无效的结果回送策略: {other}"
        ))),
    }
}
