use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grid_balancer::{Bundler, BundlerRegistry, LoadBalancerSettings};
use grid_core::models::{Job, NodeSystemInfo, TaskBundle, Task};
use grid_core::{stats, GridResult, TypedProps};
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::queue::{BundleReturnOutcome, ChannelDescriptor, JobQueue, JobReturn};

/// 节点通道的分发侧接口
///
/// 由网络层实现并在握手完成后注册到调度器。
#[async_trait]
pub trait NodeChannel: Send + Sync {
    fn channel_id(&self) -> u64;
    fn system_info(&self) -> Option<NodeSystemInfo>;
    /// 把任务束发给节点
    async fn deliver_bundle(&self, bundle: TaskBundle) -> GridResult<()>;
    /// 通知节点放弃一个在途任务束
    async fn signal_cancel(&self, bundle_uuid: &str) -> GridResult<()>;
}

enum SlotState {
    Idle,
    Busy { bundle_uuid: String },
}

/// 一个已注册通道：通道本体、专属算法实例与忙闲状态
struct ChannelSlot {
    channel: Arc<dyn NodeChannel>,
    bundler: Box<dyn Bundler>,
    state: SlotState,
}

/// 作业调度器
///
/// 维护空闲通道表，把队列中的任务束派发到空闲通道上。每个
/// 通道持有专属的负载均衡算法实例，结果返回时用分发耗时反馈
/// 给它，下一轮的任务束大小随之自整定。
pub struct JobScheduler {
    queue: Arc<JobQueue>,
    registry: Arc<BundlerRegistry>,
    slots: Mutex<HashMap<u64, ChannelSlot>>,
    wakeup: Notify,
}

impl JobScheduler {
    pub fn new(queue: Arc<JobQueue>, registry: Arc<BundlerRegistry>) -> Self {
        Self {
            queue,
            registry,
            slots: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// 作业提交入口，成功后唤醒分发循环
    pub fn submit_job(&self, job: Job) -> GridResult<UnboundedReceiver<JobReturn>> {
        let rx = self.queue.add_job(job)?;
        self.wakeup.notify_one();
        Ok(rx)
    }

    /// 注册一个完成握手的通道
    ///
    /// 按当前负载均衡设置为它创建算法实例，创建失败（未知算法
    /// 或参数非法）时拒绝接入，不留半注册状态。
    pub async fn register_channel(&self, channel: Arc<dyn NodeChannel>) -> GridResult<()> {
        let mut bundler = self.registry.create_bundler()?;
        if let Some(info) = channel.system_info() {
            bundler.update_node_info(&info);
        }
        let id = channel.channel_id();
        let mut slots = self.slots.lock().await;
        info!(
            "通道 {id} 接入, 负载均衡算法: {}",
            bundler.algorithm()
        );
        slots.insert(
            id,
            ChannelSlot {
                channel,
                bundler,
                state: SlotState::Idle,
            },
        );
        stats::record_idle_channels(idle_count(&slots));
        drop(slots);
        self.wakeup.notify_one();
        Ok(())
    }

    /// 通道断开：移除并把其在途任务束重新入队
    pub async fn remove_channel(&self, channel_id: u64) -> usize {
        let mut slots = self.slots.lock().await;
        let removed = slots.remove(&channel_id).is_some();
        stats::record_idle_channels(idle_count(&slots));
        drop(slots);
        if !removed {
            return 0;
        }
        let requeued = self.queue.handle_channel_failure(channel_id);
        self.wakeup.notify_one();
        requeued
    }

    /// 归并一个任务束的结果并反馈给该通道的算法实例
    ///
    /// 返回作业是否就此全部解析。
    pub async fn bundle_returned(
        &self,
        channel_id: u64,
        job_uuid: &str,
        bundle_uuid: &str,
        tasks: Vec<Task>,
    ) -> GridResult<bool> {
        let outcome = self.queue.bundle_returned(job_uuid, bundle_uuid, tasks);
        let mut slots = self.slots.lock().await;
        let complete = match outcome {
            BundleReturnOutcome::Merged {
                dispatched_at,
                task_count,
                complete,
                ..
            } => {
                let elapsed = dispatched_at.elapsed();
                if let Some(slot) = slots.get_mut(&channel_id) {
                    slot.bundler.feedback(task_count, elapsed);
                    slot.state = SlotState::Idle;
                }
                stats::record_dispatch_latency(elapsed);
                complete
            }
            BundleReturnOutcome::Ignored => {
                // 取消后迟到的结果：只把通道放回空闲
                if let Some(slot) = slots.get_mut(&channel_id) {
                    if matches!(&slot.state, SlotState::Busy { bundle_uuid: b } if b == bundle_uuid)
                    {
                        slot.state = SlotState::Idle;
                    }
                }
                false
            }
        };
        stats::record_idle_channels(idle_count(&slots));
        drop(slots);
        self.wakeup.notify_one();
        Ok(complete)
    }

    /// 取消作业并向持有其在途任务束的节点发取消信号
    pub async fn cancel_job(&self, uuid: &str) -> GridResult<()> {
        let signals = self.queue.cancel_job(uuid)?;
        let mut slots = self.slots.lock().await;
        for (channel_id, bundle_uuid) in signals {
            if let Some(slot) = slots.get_mut(&channel_id) {
                if let Err(e) = slot.channel.signal_cancel(&bundle_uuid).await {
                    warn!("向通道 {channel_id} 发取消信号失败: {e}");
                }
                // 任务束已作废，通道直接回到空闲
                slot.state = SlotState::Idle;
            }
        }
        drop(slots);
        self.wakeup.notify_one();
        Ok(())
    }

    /// 运行期切换负载均衡设置
    ///
    /// 新设置校验通过后，为所有已注册通道重建算法实例；已在途
    /// 的任务束不受影响，按旧实例的大小跑完。
    pub async fn change_load_balancer(
        &self,
        algorithm: &str,
        props: TypedProps,
    ) -> GridResult<()> {
        self.registry.change_settings(algorithm, props)?;
        let mut slots = self.slots.lock().await;
        for (id, slot) in slots.iter_mut() {
            let mut bundler = self.registry.create_bundler()?;
            if let Some(info) = slot.channel.system_info() {
                bundler.update_node_info(&info);
            }
            debug!("通道 {id} 重建负载均衡实例: {}", bundler.algorithm());
            slot.bundler = bundler;
        }
        Ok(())
    }

    pub fn current_load_balancer(&self) -> LoadBalancerSettings {
        self.registry.current_settings()
    }

    pub async fn channel_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn idle_channel_count(&self) -> usize {
        idle_count(&*self.slots.lock().await)
    }

    /// 分发循环主体：收到停机信号后返回
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("作业调度器启动");
        loop {
            let dispatched = self.dispatch_round().await;
            if dispatched {
                continue;
            }
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = self.queue.wait_for_work() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = shutdown.recv() => {
                    info!("作业调度器收到停机信号");
                    return;
                }
            }
        }
    }

    /// 给每个空闲通道派一个任务束，返回本轮是否有分发
    pub async fn dispatch_round(&self) -> bool {
        let mut slots = self.slots.lock().await;
        let ids: Vec<u64> = slots.keys().copied().collect();
        let mut dispatched = false;
        let mut failed: Vec<u64> = Vec::new();

        for id in ids {
            let Some(slot) = slots.get_mut(&id) else {
                continue;
            };
            if !matches!(slot.state, SlotState::Idle) {
                continue;
            }
            let descriptor = ChannelDescriptor {
                channel_id: id,
                system_info: slot.channel.system_info(),
            };
            let Some(bundle) = self.queue.next_bundle(&descriptor, slot.bundler.as_mut())
            else {
                continue;
            };
            let bundle_uuid = bundle.bundle_uuid.clone();
            slot.state = SlotState::Busy {
                bundle_uuid: bundle_uuid.clone(),
            };
            match slot.channel.deliver_bundle(bundle).await {
                Ok(()) => {
                    debug!("任务束 {bundle_uuid} 已发往通道 {id}");
                    dispatched = true;
                }
                Err(e) => {
                    error!("向通道 {id} 分发任务束 {bundle_uuid} 失败: {e}");
                    slots.remove(&id);
                    failed.push(id);
                }
            }
        }
        stats::record_idle_channels(idle_count(&slots));
        drop(slots);

        // 故障通道的在途任务束（含刚记账的这个）整体重新入队
        for id in failed {
            self.queue.handle_channel_failure(id);
        }
        dispatched
    }
}

fn idle_count(slots: &HashMap<u64, ChannelSlot>) -> usize {
    slots
        .values()
        .filter(|s| matches!(s.state, SlotState::Idle))
        .count()
}
