use serde::{Deserialize, Serialize};

/// 任务：作业中最小的独立执行单元
///
/// `position` 记录任务在作业原始列表中的下标，结果归并时按它恢复
/// 提交顺序。`payload` 与 `outcome` 中的结果体都是不透明字节流，
/// 由外部序列化协作方生成和消费。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub position: usize,
    pub payload: Vec<u8>,
    /// 完成后恰好设置其一：正常结果或失败信息
    pub outcome: Option<TaskOutcome>,
    pub cancelled: bool,
    pub timeout_ms: Option<u64>,
}

impl Task {
    pub fn new(id: impl Into<String>, position: usize, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            position,
            payload,
            outcome: None,
            cancelled: false,
            timeout_ms: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    /// 以失败结束本任务
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.outcome = Some(TaskOutcome::Error(TaskFailure {
            kind,
            message: message.into(),
        }));
    }

    /// 以取消结束本任务（取消不是失败）
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.outcome = Some(TaskOutcome::Error(TaskFailure {
            kind: FailureKind::Cancelled,
            message: "任务被取消".to_string(),
        }));
    }
}

/// 任务完成结果，结果与错误互斥
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum TaskOutcome {
    Result(Vec<u8>),
    Error(TaskFailure),
}

/// 任务级失败信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// 通道故障且重试耗尽
    NodeFailure,
    /// 用户发起的取消
    Cancelled,
    /// 不透明序列化转换失败
    Serialization,
    /// 节点执行期间抛出的错误
    Execution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exclusive() {
        let mut task = Task::new("t-1", 0, vec![1, 2, 3]);
        assert!(!task.is_done());

        task.fail(FailureKind::NodeFailure, "节点断连");
        assert!(task.is_done());
        match task.outcome.as_ref().unwrap() {
            TaskOutcome::Error(f) => assert_eq!(f.kind, FailureKind::NodeFailure),
            TaskOutcome::Result(_) => panic!("失败任务不应有正常结果"),
        }
    }

    #[test]
    fn test_cancel_marks_cancelled_not_failed() {
        let mut task = Task::new("t-2", 1, vec![]);
        task.cancel();
        assert!(task.cancelled);
        match task.outcome.as_ref().unwrap() {
            TaskOutcome::Error(f) => assert_eq!(f.kind, FailureKind::Cancelled),
            _ => panic!(),
        }
    }
}
