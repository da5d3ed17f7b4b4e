use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

/// 状态转换执行器
///
/// 所有通道的入站消息处理都经由它执行，用信号量把并发压在
/// 配置的工作线程数内，单个慢节点不会占满整个处理能力。
pub struct TransitionExecutor {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl TransitionExecutor {
    /// `workers` 为0时取可用CPU核数
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        debug!("状态转换执行器启动, 并发上限 {workers}");
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 在并发许可内执行一段转换工作
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        // 执行器不关闭信号量，acquire 只会因此失败
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("转换执行器信号量已关闭");
        work.await
    }
}
