//! 测试支撑：内存通道桩与构造辅助

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grid_balancer::{BundlerRegistry, LoadBalancerSettings};
use grid_core::models::{Job, NodeSystemInfo, Task, TaskBundle, TaskOutcome};
use grid_core::{GridError, GridResult, TypedProps};

use crate::scheduler::NodeChannel;

/// 内存中的节点通道桩
///
/// 记录收到的任务束与取消信号，可切换为投递失败模式。
pub struct MockNodeChannel {
    id: u64,
    info: Option<NodeSystemInfo>,
    pub delivered: Mutex<Vec<TaskBundle>>,
    pub cancels: Mutex<Vec<String>>,
    fail_delivery: AtomicBool,
}

impl MockNodeChannel {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            info: Some(NodeSystemInfo::new(format!("node-{id}"), "localhost", 4)),
            delivered: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            fail_delivery: AtomicBool::new(false),
        })
    }

    pub fn with_info(id: u64, info: NodeSystemInfo) -> Arc<Self> {
        Arc::new(Self {
            id,
            info: Some(info),
            delivered: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            fail_delivery: AtomicBool::new(false),
        })
    }

    pub fn set_fail_delivery(&self, fail: bool) {
        self.fail_delivery.store(fail, Ordering::SeqCst);
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    /// 把一个已投递任务束的任务全部补上结果，模拟节点执行完成
    pub fn complete_bundle(bundle: &TaskBundle) -> Vec<Task> {
        bundle
            .tasks
            .iter()
            .cloned()
            .map(|mut t| {
                t.outcome = Some(TaskOutcome::Result(vec![t.position as u8]));
                t
            })
            .collect()
    }
}

#[async_trait]
impl NodeChannel for MockNodeChannel {
    fn channel_id(&self) -> u64 {
        self.id
    }

    fn system_info(&self) -> Option<NodeSystemInfo> {
        self.info.clone()
    }

    async fn deliver_bundle(&self, bundle: TaskBundle) -> GridResult<()> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(GridError::ChannelClosed(format!("mock 通道 {}", self.id)));
        }
        self.delivered.lock().unwrap().push(bundle);
        Ok(())
    }

    async fn signal_cancel(&self, bundle_uuid: &str) -> GridResult<()> {
        self.cancels.lock().unwrap().push(bundle_uuid.to_string());
        Ok(())
    }
}

/// n个任务的作业，position与下标对齐
pub fn make_job(uuid: &str, task_count: usize) -> Job {
    let tasks = (0..task_count)
        .map(|i| Task::new(format!("{uuid}-t{i}"), i, vec![i as u8]))
        .collect();
    Job::new(uuid, format!("job-{uuid}"), tasks)
}

/// 固定大小算法的注册表
pub fn fixed_registry(size: usize) -> Arc<BundlerRegistry> {
    let registry = BundlerRegistry::new(LoadBalancerSettings {
        algorithm: "fixed_size".to_string(),
        profile: "test".to_string(),
        properties: [("size", size.to_string())].into_iter().collect::<TypedProps>(),
    });
    registry.init().expect("测试注册表初始化失败");
    Arc::new(registry)
}
