use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grid_core::models::{NodeSystemInfo, TaskBundle, WireMessage};
use grid_core::{GridError, GridResult};
use grid_dispatcher::scheduler::{JobScheduler, NodeChannel};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{ChannelContext, ChannelState};
use crate::frame::{read_frame, write_frame};
use crate::transition::TransitionExecutor;

/// 节点通道的分发侧句柄
///
/// 调度器持有它向节点投递任务束；写帧由专职写任务完成，
/// 投递只是把消息排入出站队列并推进状态机。
pub struct NodeConnection {
    channel_id: u64,
    system_info: NodeSystemInfo,
    context: Arc<ChannelContext>,
    outbound: UnboundedSender<WireMessage>,
    /// 当前在途任务束的共享数据块，资源请求从这里应答
    data_provider: Mutex<Option<Vec<u8>>>,
}

#[async_trait]
impl NodeChannel for NodeConnection {
    fn channel_id(&self) -> u64 {
        self.channel_id
    }

    fn system_info(&self) -> Option<NodeSystemInfo> {
        Some(self.system_info.clone())
    }

    async fn deliver_bundle(&self, bundle: TaskBundle) -> GridResult<()> {
        self.context.transition(ChannelState::SendingBundle)?;
        *self.data_provider.lock().expect("数据块锁中毒") = bundle.data_provider.clone();
        self.outbound
            .send(WireMessage::BundleDispatch { bundle })
            .map_err(|_| GridError::ChannelClosed(format!("节点通道 {}", self.channel_id)))?;
        self.context.transition(ChannelState::WaitingResult)?;
        Ok(())
    }

    async fn signal_cancel(&self, bundle_uuid: &str) -> GridResult<()> {
        self.outbound
            .send(WireMessage::CancelBundle {
                bundle_uuid: bundle_uuid.to_string(),
            })
            .map_err(|_| GridError::ChannelClosed(format!("节点通道 {}", self.channel_id)))?;
        // 任务束已作废，通道不再等它的结果，立即可接新分发
        if let Err(e) = self.context.transition(ChannelState::Idle) {
            debug!("节点通道 {} 取消后状态复位失败: {e}", self.channel_id);
        }
        Ok(())
    }
}

/// 一条节点连接的完整生命周期
///
/// 握手、注册到调度器、结果读循环，任何一步出错或对端关闭
/// 都走同一条退出路径：标记断连、从调度器摘除、在途任务束
/// 重新入队。
#[allow(clippy::too_many_arguments)]
pub async fn handle_node_connection(
    stream: TcpStream,
    channel_id: u64,
    driver_uuid: String,
    scheduler: Arc<JobScheduler>,
    executor: Arc<TransitionExecutor>,
    handshake_timeout: Duration,
    max_frame_len: usize,
) -> GridResult<()> {
    let context = Arc::new(ChannelContext::new(channel_id));
    context.transition(ChannelState::Handshaking)?;
    let (mut reader, mut writer) = stream.into_split();

    let system_info = match node_handshake(
        &mut reader,
        &mut writer,
        &driver_uuid,
        handshake_timeout,
        max_frame_len,
    )
    .await
    {
        Ok(info) => info,
        Err(e) => {
            context.disconnect();
            return Err(e);
        }
    };
    info!(
        "节点通道 {channel_id} 握手完成: 节点 {} ({} 线程)",
        system_info.node_uuid, system_info.threads
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(outbound_loop(writer, rx, channel_id));
    context.transition(ChannelState::Idle)?;

    let connection = Arc::new(NodeConnection {
        channel_id,
        system_info,
        context: Arc::clone(&context),
        outbound: tx,
        data_provider: Mutex::new(None),
    });
    let as_channel = Arc::clone(&connection) as Arc<dyn NodeChannel>;
    if let Err(e) = scheduler.register_channel(as_channel).await {
        context.disconnect();
        writer_task.abort();
        return Err(e);
    }

    let result = read_loop(&mut reader, &connection, &scheduler, &executor, max_frame_len).await;

    context.disconnect();
    scheduler.remove_channel(channel_id).await;
    writer_task.abort();
    info!("节点通道 {channel_id} 关闭");
    result
}

async fn node_handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    driver_uuid: &str,
    handshake_timeout: Duration,
    max_frame_len: usize,
) -> GridResult<NodeSystemInfo> {
    let payload = timeout(handshake_timeout, read_frame(reader, max_frame_len))
        .await
        .map_err(|_| GridError::Network("节点握手超时".to_string()))??
        .ok_or_else(|| GridError::ChannelClosed("节点在握手前断开".to_string()))?;

    let WireMessage::NodeHandshake { system_info } = WireMessage::decode(&payload)? else {
        return Err(GridError::Network("期望节点握手消息".to_string()));
    };
    let ack = WireMessage::HandshakeAck {
        driver_uuid: driver_uuid.to_string(),
    };
    write_frame(writer, &ack.encode()?).await?;
    Ok(system_info)
}

/// 出站写循环：顺序写帧，出错即停
async fn outbound_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WireMessage>,
    channel_id: u64,
) {
    while let Some(msg) = rx.recv().await {
        let payload = match msg.encode() {
            Ok(p) => p,
            Err(e) => {
                warn!("节点通道 {channel_id} 出站消息编码失败: {e}");
                continue;
            }
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("节点通道 {channel_id} 写帧失败: {e}");
            return;
        }
    }
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    connection: &Arc<NodeConnection>,
    scheduler: &Arc<JobScheduler>,
    executor: &Arc<TransitionExecutor>,
    max_frame_len: usize,
) -> GridResult<()> {
    while let Some(payload) = read_frame(reader, max_frame_len).await? {
        let msg = WireMessage::decode(&payload)?;
        executor
            .run(handle_node_message(connection, scheduler, msg))
            .await?;
    }
    Ok(())
}

async fn handle_node_message(
    connection: &Arc<NodeConnection>,
    scheduler: &Arc<JobScheduler>,
    msg: WireMessage,
) -> GridResult<()> {
    let channel_id = connection.channel_id;
    match msg {
        WireMessage::BundleResult {
            bundle_uuid,
            job_uuid,
            tasks,
        } => {
            // 取消过的任务束可能已把通道置回空闲，迟到的结果只记日志
            if let Err(e) = connection.context.transition(ChannelState::Idle) {
                debug!("节点通道 {channel_id} 收到结果时状态异常: {e}");
            }
            scheduler
                .bundle_returned(channel_id, &job_uuid, &bundle_uuid, tasks)
                .await?;
        }
        WireMessage::ProviderRequest { resource } => {
            connection
                .context
                .transition(ChannelState::SendingProviderResponse)?;
            let data = match resource.as_str() {
                "data_provider" => connection
                    .data_provider
                    .lock()
                    .expect("数据块锁中毒")
                    .clone(),
                _ => None,
            };
            let response = WireMessage::ProviderResponse { resource, data };
            connection
                .outbound
                .send(response)
                .map_err(|_| GridError::ChannelClosed(format!("节点通道 {channel_id}")))?;
            connection.context.transition(ChannelState::WaitingResult)?;
        }
        other => {
            warn!("节点通道 {channel_id} 收到意外消息: {other:?}");
        }
    }
    Ok(())
}
