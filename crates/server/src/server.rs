use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use grid_core::config::AppConfig;
use grid_core::GridResult;
use grid_dispatcher::scheduler::JobScheduler;
use grid_dispatcher::strategy::{self, SendResultsStrategy};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client_channel::handle_client_connection;
use crate::management::GridManagement;
use crate::node_channel::handle_node_connection;
use crate::transition::TransitionExecutor;

/// 网格驱动的网络服务
///
/// 两个监听器：节点端口与客户端端口。每条连接一个专属的
/// 处理任务，通道id进程内单调递增，节点与客户端共用同一个
/// id空间。
pub struct GridServer {
    driver_uuid: String,
    node_listener: TcpListener,
    client_listener: TcpListener,
    scheduler: Arc<JobScheduler>,
    management: Arc<GridManagement>,
    strategy: Arc<dyn SendResultsStrategy>,
    executor: Arc<TransitionExecutor>,
    handshake_timeout: Duration,
    max_frame_len: usize,
    next_channel_id: AtomicU64,
}

impl GridServer {
    /// 绑定监听端口并准备好各协作方
    pub async fn bind(config: &AppConfig, scheduler: Arc<JobScheduler>) -> GridResult<Self> {
        let node_listener = TcpListener::bind(&config.server.node_bind_addr).await?;
        let client_listener = TcpListener::bind(&config.server.client_bind_addr).await?;
        let driver_uuid = Uuid::new_v4().to_string();
        info!(
            "网格驱动 {driver_uuid} 监听: 节点 {}, 客户端 {}",
            node_listener.local_addr()?,
            client_listener.local_addr()?
        );

        Ok(Self {
            driver_uuid,
            node_listener,
            client_listener,
            management: Arc::new(GridManagement::new(Arc::clone(&scheduler))),
            scheduler,
            strategy: strategy::resolve(&config.dispatch.results_strategy)?,
            executor: Arc::new(TransitionExecutor::new(config.server.transition_workers)),
            handshake_timeout: Duration::from_secs(config.server.handshake_timeout_seconds),
            max_frame_len: config.server.max_frame_len_mb * 1024 * 1024,
            next_channel_id: AtomicU64::new(1),
        })
    }

    pub fn driver_uuid(&self) -> &str {
        &self.driver_uuid
    }

    pub fn node_addr(&self) -> GridResult<SocketAddr> {
        Ok(self.node_listener.local_addr()?)
    }

    pub fn client_addr(&self) -> GridResult<SocketAddr> {
        Ok(self.client_listener.local_addr()?)
    }

    pub fn management(&self) -> &Arc<GridManagement> {
        &self.management
    }

    /// 接收循环：收到停机信号后停止接受新连接
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.node_listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_node_handler(stream, addr),
                    Err(e) => warn!("接受节点连接失败: {e}"),
                },
                accepted = self.client_listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_client_handler(stream, addr),
                    Err(e) => warn!("接受客户端连接失败: {e}"),
                },
                _ = shutdown.recv() => {
                    info!("网络服务收到停机信号, 停止接受新连接");
                    return;
                }
            }
        }
    }

    fn spawn_node_handler(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let channel_id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        info!("节点连接 {addr} → 通道 {channel_id}");
        let driver_uuid = self.driver_uuid.clone();
        let scheduler = Arc::clone(&self.scheduler);
        let executor = Arc::clone(&self.executor);
        let handshake_timeout = self.handshake_timeout;
        let max_frame_len = self.max_frame_len;
        tokio::spawn(async move {
            if let Err(e) = handle_node_connection(
                stream,
                channel_id,
                driver_uuid,
                scheduler,
                executor,
                handshake_timeout,
                max_frame_len,
            )
            .await
            {
                warn!("节点通道 {channel_id} 异常结束: {e}");
            }
        });
    }

    fn spawn_client_handler(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let channel_id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        info!("客户端连接 {addr} → 通道 {channel_id}");
        let driver_uuid = self.driver_uuid.clone();
        let scheduler = Arc::clone(&self.scheduler);
        let management = Arc::clone(&self.management);
        let strategy = Arc::clone(&self.strategy);
        let executor = Arc::clone(&self.executor);
        let handshake_timeout = self.handshake_timeout;
        let max_frame_len = self.max_frame_len;
        tokio::spawn(async move {
            if let Err(e) = handle_client_connection(
                stream,
                channel_id,
                driver_uuid,
                scheduler,
                management,
                strategy,
                executor,
                handshake_timeout,
                max_frame_len,
            )
            .await
            {
                warn!("客户端通道 {channel_id} 异常结束: {e}");
            }
        });
    }
}
