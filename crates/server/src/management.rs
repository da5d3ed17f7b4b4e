use std::collections::HashMap;
use std::sync::Arc;

use grid_core::{GridResult, TypedProps};
use grid_dispatcher::scheduler::JobScheduler;
use tracing::info;

/// 管理门面
///
/// 客户端通道上的管理命令在这里落地：运行期切换负载均衡
/// 设置、查询当前设置。变更经注册表干跑校验，失败时当前
/// 设置不受影响。
pub struct GridManagement {
    scheduler: Arc<JobScheduler>,
}

impl GridManagement {
    pub fn new(scheduler: Arc<JobScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn change_load_balancer_settings(
        &self,
        algorithm: &str,
        properties: HashMap<String, String>,
    ) -> GridResult<()> {
        info!("管理命令: 切换负载均衡算法为 {algorithm}");
        self.scheduler
            .change_load_balancer(algorithm, TypedProps::from(properties))
            .await
    }

    pub fn load_balancer_settings(&self) -> (String, HashMap<String, String>) {
        let settings = self.scheduler.current_load_balancer();
        (settings.algorithm, settings.properties.into_map())
    }
}
