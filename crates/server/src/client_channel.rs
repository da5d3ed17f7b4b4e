use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grid_core::models::{Task, WireMessage};
use grid_core::{GridError, GridResult};
use grid_dispatcher::queue::JobReturn;
use grid_dispatcher::scheduler::JobScheduler;
use grid_dispatcher::strategy::SendResultsStrategy;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{ChannelContext, ChannelState};
use crate::frame::{read_frame, write_frame};
use crate::management::GridManagement;
use crate::transition::TransitionExecutor;

/// 本连接提交、尚未全部解析的作业：uuid → 断连时是否取消
type TrackedJobs = Arc<Mutex<HashMap<String, bool>>>;

/// 一条客户端连接的完整生命周期
///
/// 握手后接收作业提交、取消与管理命令；每个被接受的作业有
/// 专属的结果泵任务，按回送策略把结果分批写回。断连时取消
/// 所有标记了 `cancel_upon_client_disconnect` 的未完作业。
#[allow(clippy::too_many_arguments)]
pub async fn handle_client_connection(
    stream: TcpStream,
    channel_id: u64,
    driver_uuid: String,
    scheduler: Arc<JobScheduler>,
    management: Arc<GridManagement>,
    strategy: Arc<dyn SendResultsStrategy>,
    executor: Arc<TransitionExecutor>,
    handshake_timeout: Duration,
    max_frame_len: usize,
) -> GridResult<()> {
    let context = ChannelContext::new(channel_id);
    context.transition(ChannelState::Handshaking)?;
    let (mut reader, mut writer) = stream.into_split();

    let client_uuid = match client_handshake(
        &mut reader,
        &mut writer,
        &driver_uuid,
        handshake_timeout,
        max_frame_len,
    )
    .await
    {
        Ok(uuid) => uuid,
        Err(e) => {
            context.disconnect();
            return Err(e);
        }
    };
    info!("客户端通道 {channel_id} 握手完成: 客户端 {client_uuid}");
    context.transition(ChannelState::Idle)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(outbound_loop(writer, rx, channel_id));
    let tracked: TrackedJobs = Arc::new(Mutex::new(HashMap::new()));

    let result = read_loop(
        &mut reader,
        channel_id,
        &scheduler,
        &management,
        &strategy,
        &executor,
        &tx,
        &tracked,
        max_frame_len,
    )
    .await;

    context.disconnect();
    writer_task.abort();
    cancel_abandoned_jobs(&scheduler, &tracked, channel_id).await;
    info!("客户端通道 {channel_id} 关闭");
    result
}

async fn client_handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    driver_uuid: &str,
    handshake_timeout: Duration,
    max_frame_len: usize,
) -> GridResult<String> {
    let payload = timeout(handshake_timeout, read_frame(reader, max_frame_len))
        .await
        .map_err(|_| GridError::Network("客户端握手超时".to_string()))??
        .ok_or_else(|| GridError::ChannelClosed("客户端在握手前断开".to_string()))?;

    let WireMessage::ClientHandshake { client_uuid } = WireMessage::decode(&payload)? else {
        return Err(GridError::Network("期望客户端握手消息".to_string()));
    };
    let ack = WireMessage::HandshakeAck {
        driver_uuid: driver_uuid.to_string(),
    };
    write_frame(writer, &ack.encode()?).await?;
    Ok(client_uuid)
}

async fn outbound_loop(
    mut writer: OwnedWriteHalf,
    mut rx: UnboundedReceiver<WireMessage>,
    channel_id: u64,
) {
    while let Some(msg) = rx.recv().await {
        let payload = match msg.encode() {
            Ok(p) => p,
            Err(e) => {
                warn!("客户端通道 {channel_id} 出站消息编码失败: {e}");
                continue;
            }
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("客户端通道 {channel_id} 写帧失败: {e}");
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    reader: &mut OwnedReadHalf,
    channel_id: u64,
    scheduler: &Arc<JobScheduler>,
    management: &Arc<GridManagement>,
    strategy: &Arc<dyn SendResultsStrategy>,
    executor: &Arc<TransitionExecutor>,
    outbound: &UnboundedSender<WireMessage>,
    tracked: &TrackedJobs,
    max_frame_len: usize,
) -> GridResult<()> {
    while let Some(payload) = read_frame(reader, max_frame_len).await? {
        let msg = WireMessage::decode(&payload)?;
        executor
            .run(handle_client_message(
                channel_id, scheduler, management, strategy, outbound, tracked, msg,
            ))
            .await?;
    }
    Ok(())
}

async fn handle_client_message(
    channel_id: u64,
    scheduler: &Arc<JobScheduler>,
    management: &Arc<GridManagement>,
    strategy: &Arc<dyn SendResultsStrategy>,
    outbound: &UnboundedSender<WireMessage>,
    tracked: &TrackedJobs,
    msg: WireMessage,
) -> GridResult<()> {
    match msg {
        WireMessage::JobSubmit { job } => {
            let job_uuid = job.uuid.clone();
            let cancel_on_disconnect = job.sla.cancel_upon_client_disconnect;
            match scheduler.submit_job(job) {
                Ok(events) => {
                    tracked
                        .lock()
                        .expect("作业跟踪锁中毒")
                        .insert(job_uuid.clone(), cancel_on_disconnect);
                    send(outbound, WireMessage::JobAccepted {
                        job_uuid: job_uuid.clone(),
                    })?;
                    tokio::spawn(pump_results(
                        events,
                        job_uuid,
                        outbound.clone(),
                        Arc::clone(strategy),
                        Arc::clone(tracked),
                    ));
                }
                Err(e) => {
                    warn!("客户端通道 {channel_id} 提交作业 {job_uuid} 被拒绝: {e}");
                    send(outbound, WireMessage::JobRejected {
                        job_uuid,
                        reason: e.to_string(),
                    })?;
                }
            }
        }
        WireMessage::CancelJob { job_uuid } => match scheduler.cancel_job(&job_uuid).await {
            Ok(()) => send(outbound, WireMessage::AdminOk)?,
            Err(e) => {
                debug!("客户端通道 {channel_id} 取消作业 {job_uuid} 失败: {e}");
                send(outbound, WireMessage::AdminError {
                    reason: e.to_string(),
                })?;
            }
        },
        WireMessage::AdminChangeLoadBalancer {
            algorithm,
            properties,
        } => {
            let reply = match management
                .change_load_balancer_settings(&algorithm, properties)
                .await
            {
                Ok(()) => WireMessage::AdminOk,
                Err(e) => WireMessage::AdminError {
                    reason: e.to_string(),
                },
            };
            send(outbound, reply)?;
        }
        WireMessage::AdminQueryLoadBalancer => {
            let (algorithm, properties) = management.load_balancer_settings();
            send(outbound, WireMessage::AdminLoadBalancerSettings {
                algorithm,
                properties,
            })?;
        }
        other => {
            warn!("客户端通道 {channel_id} 收到意外消息: {other:?}");
        }
    }
    Ok(())
}

fn send(outbound: &UnboundedSender<WireMessage>, msg: WireMessage) -> GridResult<()> {
    outbound
        .send(msg)
        .map_err(|_| GridError::ChannelClosed("客户端出站队列已关闭".to_string()))
}

/// 作业结果泵
///
/// 按回送策略把结果事件分批写回客户端；无论策略如何，作业
/// 完成的那批总会带着 `complete` 发出，此前缓冲的结果按
/// position 排序后一并送出。
async fn pump_results(
    mut events: UnboundedReceiver<JobReturn>,
    job_uuid: String,
    outbound: UnboundedSender<WireMessage>,
    strategy: Arc<dyn SendResultsStrategy>,
    tracked: TrackedJobs,
) {
    let mut buffered: Vec<Task> = Vec::new();
    while let Some(ev) = events.recv().await {
        let send_now = strategy.should_send(ev.tasks.len(), ev.remaining_before) || ev.complete;
        buffered.extend(ev.tasks);
        if send_now {
            buffered.sort_by_key(|t| t.position);
            let tasks = std::mem::take(&mut buffered);
            let msg = WireMessage::TaskResults {
                job_uuid: job_uuid.clone(),
                tasks,
                complete: ev.complete,
            };
            if outbound.send(msg).is_err() {
                break;
            }
        }
        if ev.complete {
            tracked.lock().expect("作业跟踪锁中毒").remove(&job_uuid);
            break;
        }
    }
}

/// 断连清理：取消要求随客户端一同消失的未完作业
async fn cancel_abandoned_jobs(
    scheduler: &Arc<JobScheduler>,
    tracked: &TrackedJobs,
    channel_id: u64,
) {
    let jobs: Vec<(String, bool)> = tracked
        .lock()
        .expect("作业跟踪锁中毒")
        .drain()
        .collect();
    for (job_uuid, cancel) in jobs {
        if !cancel {
            continue;
        }
        info!("客户端通道 {channel_id} 断开, 取消作业 {job_uuid}");
        if let Err(e) = scheduler.cancel_job(&job_uuid).await {
            debug!("断连取消作业 {job_uuid} 失败: {e}");
        }
    }
}
