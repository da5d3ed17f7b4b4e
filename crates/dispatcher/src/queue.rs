use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use grid_balancer::Bundler;
use grid_core::models::{FailureKind, Job, JobSla, NodeSystemInfo, Task, TaskBundle};
use grid_core::{stats, GridError, GridResult};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::dependency::DependencyManager;
use crate::retry::RequeuePolicy;

/// 分发目标通道的描述
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    pub channel_id: u64,
    /// 节点握手上报的系统信息，握手未完成时为 None
    pub system_info: Option<NodeSystemInfo>,
}

/// 队列推送给作业提交方的结果事件
///
/// 每次结果归并（含取消与重试耗尽）产生一个事件，`tasks` 带着
/// 已设置的结果。`remaining_before` 是归并前尚未解析的任务数，
/// 供回送策略判断这批是否为最后一批。
#[derive(Debug)]
pub struct JobReturn {
    pub job_uuid: String,
    pub tasks: Vec<Task>,
    pub remaining_before: usize,
    pub complete: bool,
}

/// `bundle_returned` 的裁决结果
#[derive(Debug)]
pub enum BundleReturnOutcome {
    /// 结果已归并
    Merged {
        channel_id: u64,
        dispatched_at: Instant,
        task_count: usize,
        complete: bool,
    },
    /// 作业或任务束已不在队列中（取消后迟到的结果），丢弃
    Ignored,
}

/// 一次已分发、结果未归并的任务束
#[derive(Debug)]
struct InFlightBundle {
    channel_id: u64,
    /// 分发出去任务的副本，通道故障时据此重新入队
    tasks: Vec<Task>,
    dispatched_at: Instant,
}

/// 队列持有的作业
struct ServerJob {
    name: String,
    sla: JobSla,
    data_provider: Option<Vec<u8>>,
    /// 未分发任务，按position升序
    pending: VecDeque<Task>,
    /// bundle_uuid → 在途任务束
    in_flight: HashMap<String, InFlightBundle>,
    /// position → 已重新入队次数
    task_retries: HashMap<usize, u32>,
    /// 已出结果（含失败与取消）的任务数
    resolved: usize,
    total: usize,
    cancelled: bool,
    /// 退避窗口：此刻之前不参与分发
    not_before: Option<Instant>,
    enqueued_at: Instant,
    events: UnboundedSender<JobReturn>,
}

impl ServerJob {
    fn remaining(&self) -> usize {
        self.total - self.resolved
    }

    fn emit(&self, uuid: &str, tasks: Vec<Task>, remaining_before: usize, complete: bool) {
        // 接收方可能已断开，事件丢弃不影响队列状态
        let _ = self.events.send(JobReturn {
            job_uuid: uuid.to_string(),
            tasks,
            remaining_before,
            complete,
        });
    }
}

struct QueueInner {
    /// 优先级 → 该优先级下的作业uuid（FIFO）
    priority_map: BTreeMap<Reverse<i32>, VecDeque<String>>,
    jobs: HashMap<String, ServerJob>,
    deps: DependencyManager,
}

impl QueueInner {
    /// 把作业挂回优先级表（幂等）
    fn link(&mut self, priority: i32, uuid: &str) {
        let slot = self.priority_map.entry(Reverse(priority)).or_default();
        if !slot.iter().any(|u| u == uuid) {
            slot.push_back(uuid.to_string());
        }
    }

    fn unlink(&mut self, priority: i32, uuid: &str) {
        if let Some(slot) = self.priority_map.get_mut(&Reverse(priority)) {
            slot.retain(|u| u != uuid);
            if slot.is_empty() {
                self.priority_map.remove(&Reverse(priority));
            }
        }
    }

    /// 队列中全部未解析任务数（含在途）
    fn unresolved_tasks(&self) -> usize {
        self.jobs.values().map(ServerJob::remaining).sum()
    }

    fn max_pending_job_size(&self) -> usize {
        self.jobs.values().map(|j| j.pending.len()).max().unwrap_or(0)
    }
}

/// 作业队列
///
/// 单锁保护的优先级队列：作业按优先级降序、同优先级FIFO参与
/// 分发，每次分发取队首作业的一段连续任务。所有公开操作在
/// 一次持锁内完成，互相串行。
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    policy: RequeuePolicy,
    notify: Notify,
}

impl JobQueue {
    pub fn new(policy: RequeuePolicy) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                priority_map: BTreeMap::new(),
                jobs: HashMap::new(),
                deps: DependencyManager::new(),
            }),
            policy,
            notify: Notify::new(),
        }
    }

    /// 有新工作可分发时返回
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// 作业入队
    ///
    /// 返回结果事件接收端，作业的每批结果按到达顺序推送。
    /// uuid重复与校验失败整体拒绝，队列状态不变。
    pub fn add_job(&self, job: Job) -> GridResult<UnboundedReceiver<JobReturn>> {
        job.validate()?;
        let mut inner = self.inner.lock().expect("队列锁中毒");

        if inner.jobs.contains_key(&job.uuid) {
            return Err(GridError::InvalidJob(format!(
                "作业uuid重复: {}",
                job.uuid
            )));
        }
        inner.deps.register(&job.uuid, &job.dependencies)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let total = job.tasks.len();
        let priority = job.sla.priority;
        let server_job = ServerJob {
            name: job.name.clone(),
            sla: job.sla,
            data_provider: job.data_provider,
            pending: job.tasks.into(),
            in_flight: HashMap::new(),
            task_retries: HashMap::new(),
            resolved: 0,
            total,
            cancelled: false,
            not_before: None,
            enqueued_at: Instant::now(),
            events: tx,
        };
        info!(
            "作业 {} ({}) 入队: {} 个任务, 优先级 {}",
            job.uuid, server_job.name, total, priority
        );
        let uuid = job.uuid;
        inner.jobs.insert(uuid.clone(), server_job);
        inner.link(priority, &uuid);

        stats::record_tasks_in(total);
        stats::record_queue_size(inner.unresolved_tasks());
        drop(inner);
        self.notify.notify_one();
        Ok(rx)
    }

    /// 为一个空闲通道取下一个任务束
    ///
    /// 按优先级降序、同优先级FIFO扫描，跳过被依赖阻塞、处于
    /// 退避窗口、执行策略不满足或 max_nodes 已满的作业。任务束
    /// 大小取算法给定值与作业剩余任务数的较小者。
    pub fn next_bundle(
        &self,
        channel: &ChannelDescriptor,
        bundler: &mut dyn Bundler,
    ) -> Option<TaskBundle> {
        let mut inner = self.inner.lock().expect("队列锁中毒");
        let now = Instant::now();

        // 全局上限跟随队列中最大的作业
        let max_pending = inner.max_pending_job_size();
        if max_pending >= 1 {
            bundler.set_max_size(max_pending);
        }

        let selected = {
            let QueueInner {
                priority_map,
                jobs,
                deps,
            } = &*inner;
            priority_map
                .values()
                .flatten()
                .find(|uuid| {
                    let Some(job) = jobs.get(*uuid) else {
                        return false;
                    };
                    eligible(job, uuid, deps, channel, now)
                })
                .cloned()
        };
        let uuid = selected?;

        let size = bundler.bundle_size().max(1);
        let job = inner.jobs.get_mut(&uuid)?;
        let take = size.min(job.pending.len());
        let tasks: Vec<Task> = job.pending.drain(..take).collect();
        let retry_count = tasks
            .iter()
            .filter_map(|t| job.task_retries.get(&t.position))
            .copied()
            .max()
            .unwrap_or(0);
        job.not_before = None;

        let bundle = TaskBundle::new(
            uuid.clone(),
            job.name.clone(),
            job.sla.priority,
            tasks.clone(),
            job.data_provider.clone(),
            retry_count,
        );
        job.in_flight.insert(
            bundle.bundle_uuid.clone(),
            InFlightBundle {
                channel_id: channel.channel_id,
                tasks,
                dispatched_at: now,
            },
        );
        let queue_time = now.duration_since(job.enqueued_at);
        let priority = job.sla.priority;
        let drained = job.pending.is_empty();
        debug!(
            "任务束 {} 出队: 作业 {}, {} 个任务 → 通道 {}",
            bundle.bundle_uuid,
            uuid,
            bundle.task_count(),
            channel.channel_id
        );
        if drained {
            inner.unlink(priority, &uuid);
        }

        stats::record_tasks_out(bundle.task_count(), queue_time);
        stats::record_dispatch();
        Some(bundle)
    }

    /// 归并一个任务束的结果
    pub fn bundle_returned(
        &self,
        job_uuid: &str,
        bundle_uuid: &str,
        returned: Vec<Task>,
    ) -> BundleReturnOutcome {
        let mut inner = self.inner.lock().expect("队列锁中毒");
        let Some(job) = inner.jobs.get_mut(job_uuid) else {
            debug!("丢弃迟到的任务束结果: 作业 {job_uuid} 已不在队列");
            return BundleReturnOutcome::Ignored;
        };
        let Some(entry) = job.in_flight.remove(bundle_uuid) else {
            debug!("丢弃迟到的任务束结果: 任务束 {bundle_uuid} 已不在途");
            return BundleReturnOutcome::Ignored;
        };

        let mut merged = Vec::with_capacity(entry.tasks.len());
        let mut seen = std::collections::HashSet::new();
        for mut task in returned {
            if task.outcome.is_none() {
                task.fail(FailureKind::Execution, "节点未返回该任务的结果");
            }
            seen.insert(task.position);
            merged.push(task);
        }
        // 节点漏报的任务按执行失败归并，不让作业悬停
        for task in entry.tasks.iter().filter(|t| !seen.contains(&t.position)) {
            let mut task = task.clone();
            task.fail(FailureKind::Execution, "节点返回中缺失该任务");
            merged.push(task);
        }
        for task in &merged {
            job.task_retries.remove(&task.position);
        }

        let remaining_before = job.remaining();
        job.resolved += merged.len();
        let complete = job.resolved >= job.total;
        let task_count = entry.tasks.len();
        job.emit(job_uuid, merged, remaining_before, complete);

        if complete {
            self.finish_job(&mut inner, job_uuid);
        }
        stats::record_queue_size(inner.unresolved_tasks());
        drop(inner);
        if complete {
            self.notify.notify_one();
        }
        BundleReturnOutcome::Merged {
            channel_id: entry.channel_id,
            dispatched_at: entry.dispatched_at,
            task_count,
            complete,
        }
    }

    /// 把一个在途任务束重新入队（分发失败路径）
    pub fn requeue_bundle(&self, job_uuid: &str, bundle_uuid: &str) -> bool {
        let mut inner = self.inner.lock().expect("队列锁中毒");
        let Some(job) = inner.jobs.get_mut(job_uuid) else {
            return false;
        };
        let Some(entry) = job.in_flight.remove(bundle_uuid) else {
            return false;
        };
        let complete = self.requeue_entry(job, job_uuid, entry);
        let priority = job.sla.priority;
        let relink = !job.pending.is_empty();
        if complete {
            self.finish_job(&mut inner, job_uuid);
        } else if relink {
            inner.link(priority, job_uuid);
        }
        stats::record_queue_size(inner.unresolved_tasks());
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// 通道故障：其上全部在途任务束重新入队
    pub fn handle_channel_failure(&self, channel_id: u64) -> usize {
        let mut inner = self.inner.lock().expect("队列锁中毒");
        let affected: Vec<(String, String)> = inner
            .jobs
            .iter()
            .flat_map(|(uuid, job)| {
                job.in_flight
                    .iter()
                    .filter(|(_, e)| e.channel_id == channel_id)
                    .map(|(b, _)| (uuid.clone(), b.clone()))
            })
            .collect();

        for (job_uuid, bundle_uuid) in &affected {
            if let Some(job) = inner.jobs.get_mut(job_uuid) {
                if let Some(entry) = job.in_flight.remove(bundle_uuid) {
                    let complete = self.requeue_entry(job, job_uuid, entry);
                    let priority = job.sla.priority;
                    let relink = !job.pending.is_empty();
                    if complete {
                        self.finish_job(&mut inner, job_uuid);
                    } else if relink {
                        inner.link(priority, job_uuid);
                    }
                }
            }
        }
        if !affected.is_empty() {
            warn!(
                "通道 {channel_id} 故障, {} 个在途任务束重新入队",
                affected.len()
            );
            stats::record_queue_size(inner.unresolved_tasks());
            drop(inner);
            self.notify.notify_one();
        }
        affected.len()
    }

    /// 取消作业
    ///
    /// 未分发任务立即以取消结束；在途任务束就地作废，返回
    /// `(通道id, 任务束uuid)` 供调用方向节点发取消信号，之后
    /// 迟到的结果被丢弃。
    pub fn cancel_job(&self, uuid: &str) -> GridResult<Vec<(u64, String)>> {
        let mut inner = self.inner.lock().expect("队列锁中毒");
        let Some(job) = inner.jobs.get_mut(uuid) else {
            return Err(GridError::JobNotFound {
                uuid: uuid.to_string(),
            });
        };
        if job.cancelled {
            return Ok(Vec::new());
        }
        job.cancelled = true;

        let mut cancelled: Vec<Task> = Vec::new();
        for mut task in job.pending.drain(..) {
            task.cancel();
            cancelled.push(task);
        }
        let mut signals = Vec::new();
        for (bundle_uuid, entry) in job.in_flight.drain() {
            signals.push((entry.channel_id, bundle_uuid));
            for mut task in entry.tasks {
                task.cancel();
                cancelled.push(task);
            }
        }

        let remaining_before = job.remaining();
        job.resolved += cancelled.len();
        let priority = job.sla.priority;
        job.emit(uuid, cancelled, remaining_before, true);
        info!("作业 {uuid} 已取消, 通知 {} 个在途通道", signals.len());

        inner.unlink(priority, uuid);
        self.finish_job(&mut inner, uuid);
        stats::record_queue_size(inner.unresolved_tasks());
        drop(inner);
        self.notify.notify_one();
        Ok(signals)
    }

    pub fn has_job(&self, uuid: &str) -> bool {
        self.inner.lock().expect("队列锁中毒").jobs.contains_key(uuid)
    }

    pub fn job_count(&self) -> usize {
        self.inner.lock().expect("队列锁中毒").jobs.len()
    }

    /// 未分发任务总数
    pub fn pending_task_count(&self) -> usize {
        let inner = self.inner.lock().expect("队列锁中毒");
        inner.jobs.values().map(|j| j.pending.len()).sum()
    }

    /// 作业出队清理：也解除依赖它的作业的阻塞
    fn finish_job(&self, inner: &mut QueueInner, uuid: &str) {
        if let Some(job) = inner.jobs.remove(uuid) {
            inner.unlink(job.sla.priority, uuid);
            debug!("作业 {uuid} 出队: {}/{} 任务已解析", job.resolved, job.total);
        }
        let released = inner.deps.mark_complete(uuid);
        for waiter in released {
            info!("作业 {waiter} 的依赖已全部完成");
        }
    }

    /// 把在途任务束的任务放回队首，重试耗尽的任务以节点故障结束
    ///
    /// 返回作业是否因此全部解析。
    fn requeue_entry(&self, job: &mut ServerJob, job_uuid: &str, entry: InFlightBundle) -> bool {
        let mut requeued: Vec<Task> = Vec::new();
        let mut exhausted: Vec<Task> = Vec::new();
        let mut retry_round = 0u32;

        for mut task in entry.tasks {
            let retries = job.task_retries.get(&task.position).copied().unwrap_or(0) + 1;
            if retries > self.policy.max_bundle_retries {
                task.fail(
                    FailureKind::NodeFailure,
                    format!("通道故障且重试 {} 次后仍未完成", retries - 1),
                );
                job.task_retries.remove(&task.position);
                exhausted.push(task);
            } else {
                job.task_retries.insert(task.position, retries);
                retry_round = retry_round.max(retries);
                requeued.push(task);
            }
        }

        // 放回队首，保持原有顺序
        for task in requeued.into_iter().rev() {
            job.pending.push_front(task);
        }
        if retry_round > 0 {
            job.not_before = Some(Instant::now() + self.policy.backoff(retry_round));
        }
        stats::record_requeue();

        if !exhausted.is_empty() {
            warn!(
                "作业 {job_uuid} 的 {} 个任务重试耗尽, 以节点故障结束",
                exhausted.len()
            );
            let remaining_before = job.remaining();
            job.resolved += exhausted.len();
            let complete = job.resolved >= job.total;
            job.emit(job_uuid, exhausted, remaining_before, complete);
            complete
        } else {
            false
        }
    }
}

/// 作业本轮是否可向该通道分发
fn eligible(
    job: &ServerJob,
    uuid: &str,
    deps: &DependencyManager,
    channel: &ChannelDescriptor,
    now: Instant,
) -> bool {
    if job.cancelled || job.pending.is_empty() {
        return false;
    }
    if deps.is_blocked(uuid) {
        return false;
    }
    if let Some(t) = job.not_before {
        if now < t {
            return false;
        }
    }
    if let Some(policy) = &job.sla.execution_policy {
        // 未上报系统信息的通道无从判定，保守跳过
        match &channel.system_info {
            Some(info) => {
                if !policy.evaluate(info) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(max_nodes) = job.sla.max_nodes {
        let mut channels: Vec<u64> = job.in_flight.values().map(|e| e.channel_id).collect();
        channels.sort_unstable();
        channels.dedup();
        if !channels.contains(&channel.channel_id) && channels.len() >= max_nodes {
            return false;
        }
    }
    true
}
