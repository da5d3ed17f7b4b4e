use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::task::Task;

/// 任务束：作业中一段连续任务的一次分发
///
/// 在队列决定向某个通道分发时创建，结果返回或分发失败重新
/// 入队后销毁。`retry_count` 跟随任务束在失败重入时累加。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBundle {
    pub bundle_uuid: String,
    pub job_uuid: String,
    pub name: String,
    pub priority: i32,
    pub tasks: Vec<Task>,
    pub data_provider: Option<Vec<u8>>,
    pub retry_count: u32,
}

impl TaskBundle {
    pub fn new(
        job_uuid: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        tasks: Vec<Task>,
        data_provider: Option<Vec<u8>>,
        retry_count: u32,
    ) -> Self {
        Self {
            bundle_uuid: Uuid::new_v4().to_string(),
            job_uuid: job_uuid.into(),
            name: name.into(),
            priority,
            tasks,
            data_provider,
            retry_count,
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
