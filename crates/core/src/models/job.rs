use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{GridError, GridResult};
use crate::models::policy::ExecutionPolicy;
use crate::models::task::Task;

/// 作业级SLA约束
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSla {
    /// 优先级，越大越先分发
    pub priority: i32,
    /// 节点筛选谓词，None 表示接受所有节点
    pub execution_policy: Option<ExecutionPolicy>,
    /// 同时参与本作业的节点数上限
    pub max_nodes: Option<usize>,
    /// 广播标志（携带于SLA，分发语义见 DESIGN.md）
    pub broadcast: bool,
    /// 客户端断连时是否取消作业
    pub cancel_upon_client_disconnect: bool,
}

impl Default for JobSla {
    fn default() -> Self {
        Self {
            priority: 0,
            execution_policy: None,
            max_nodes: None,
            broadcast: false,
            cancel_upon_client_disconnect: true,
        }
    }
}

/// 客户端提交的作业
///
/// 入队后由作业队列持有，全部任务出结果（或异常）后所有权
/// 回到客户端侧。`data_provider` 是所有任务共享的不透明数据块。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub uuid: String,
    pub name: String,
    pub sla: JobSla,
    pub tasks: Vec<Task>,
    pub data_provider: Option<Vec<u8>>,
    /// 依赖的作业uuid，全部完成前本作业不参与分发
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            sla: JobSla::default(),
            tasks,
            data_provider: None,
            dependencies: Vec::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 入队前校验
    ///
    /// uuid非空、任务非空、position 必须与下标一致（结果排序不变式
    /// 依赖这一点）。uuid重复由队列在持锁后判定。
    pub fn validate(&self) -> GridResult<()> {
        if self.uuid.trim().is_empty() {
            return Err(GridError::InvalidJob("作业uuid不能为空".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(GridError::InvalidJob(format!(
                "作业 {} 不包含任何任务",
                self.uuid
            )));
        }
        for (i, task) in self.tasks.iter().enumerate() {
            if task.position != i {
                return Err(GridError::InvalidJob(format!(
                    "作业 {} 的任务 {} position 不连续: 期望 {i}, 实际 {}",
                    self.uuid, task.id, task.position
                )));
            }
            if task.outcome.is_some() {
                return Err(GridError::InvalidJob(format!(
                    "作业 {} 的任务 {} 提交时已带结果",
                    self.uuid, task.id
                )));
            }
        }
        if self.dependencies.iter().any(|d| d == &self.uuid) {
            return Err(GridError::CircularDependency);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new(format!("t-{i}"), i, vec![]))
            .collect()
    }

    #[test]
    fn test_validate_ok() {
        let job = Job::new("job-1", "test", make_tasks(3));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_uuid_and_tasks() {
        let job = Job::new("", "test", make_tasks(1));
        assert!(matches!(job.validate(), Err(GridError::InvalidJob(_))));

        let job = Job::new("job-2", "test", vec![]);
        assert!(matches!(job.validate(), Err(GridError::InvalidJob(_))));
    }

    #[test]
    fn test_validate_rejects_bad_positions() {
        let mut tasks = make_tasks(2);
        tasks[1].position = 5;
        let job = Job::new("job-3", "test", tasks);
        assert!(matches!(job.validate(), Err(GridError::InvalidJob(_))));
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let mut job = Job::new("job-4", "test", make_tasks(1));
        job.dependencies.push("job-4".to_string());
        assert!(matches!(
            job.validate(),
            Err(GridError::CircularDependency)
        ));
    }
}
