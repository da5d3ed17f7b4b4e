use std::sync::Arc;

use anyhow::{Context, Result};
use grid_balancer::{BundlerRegistry, LoadBalancerSettings};
use grid_core::config::AppConfig;
use grid_core::TypedProps;
use grid_dispatcher::queue::JobQueue;
use grid_dispatcher::retry::RequeuePolicy;
use grid_dispatcher::scheduler::JobScheduler;
use grid_server::GridServer;
use tokio::sync::broadcast;
use tracing::info;

/// 网格驱动应用
///
/// 按依赖顺序组装各组件：负载均衡注册表 → 作业队列 →
/// 调度器 → 网络服务。注册表在启动时校验配置的算法，
/// 配置错误让启动直接失败。
pub struct Application {
    scheduler: Arc<JobScheduler>,
    server: Arc<GridServer>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let registry = BundlerRegistry::new(LoadBalancerSettings {
            algorithm: config.load_balancing.algorithm.clone(),
            profile: config.load_balancing.profile.clone(),
            properties: TypedProps::from(config.load_balancing.properties.clone()),
        });
        registry.init().context("初始化负载均衡注册表失败")?;

        let queue = Arc::new(JobQueue::new(RequeuePolicy::from_config(&config.dispatch)));
        let scheduler = Arc::new(JobScheduler::new(queue, Arc::new(registry)));
        let server = Arc::new(
            GridServer::bind(&config, Arc::clone(&scheduler))
                .await
                .context("绑定监听端口失败")?,
        );

        Ok(Self { scheduler, server })
    }

    /// 运行到关闭信号到达
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let scheduler_rx = shutdown.resubscribe();
        let scheduler_task = tokio::spawn(async move {
            scheduler.run(scheduler_rx).await;
        });

        self.server.run(shutdown).await;
        scheduler_task.await.context("调度器任务异常退出")?;
        info!("全部组件已停止");
        Ok(())
    }
}
