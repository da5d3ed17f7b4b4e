//! 统计样本发射
//!
//! 核心只负责发出命名数值样本，收集与导出由外部协作方完成。

use std::time::Duration;

/// 队列当前任务总数
pub const QUEUE_SIZE: &str = "grid.queue.size";
/// 进入队列的任务数
pub const QUEUE_TASKS_IN: &str = "grid.queue.tasks_in";
/// 离开队列的任务数
pub const QUEUE_TASKS_OUT: &str = "grid.queue.tasks_out";
/// 任务在队列中的停留时间
pub const QUEUE_TIME_MS: &str = "grid.queue.time_ms";
/// 分发出去的任务束数
pub const DISPATCH_COUNT: &str = "grid.dispatch.count";
/// 任务束从分发到结果返回的耗时
pub const DISPATCH_LATENCY_MS: &str = "grid.dispatch.latency_ms";
/// 重新入队次数
pub const REQUEUE_COUNT: &str = "grid.requeue.count";
/// 空闲通道数
pub const IDLE_CHANNELS: &str = "grid.channels.idle";

pub fn record_queue_size(size: usize) {
    metrics::gauge!(QUEUE_SIZE).set(size as f64);
}

pub fn record_tasks_in(count: usize) {
    metrics::counter!(QUEUE_TASKS_IN).increment(count as u64);
}

pub fn record_tasks_out(count: usize, queue_time: Duration) {
    metrics::counter!(QUEUE_TASKS_OUT).increment(count as u64);
    metrics::histogram!(QUEUE_TIME_MS).record(queue_time.as_secs_f64() * 1000.0);
}

pub fn record_dispatch() {
    metrics::counter!(DISPATCH_COUNT).increment(1);
}

pub fn record_dispatch_latency(latency: Duration) {
    metrics::histogram!(DISPATCH_LATENCY_MS).record(latency.as_secs_f64() * 1000.0);
}

pub fn record_requeue() {
    metrics::counter!(REQUEUE_COUNT).increment(1);
}

pub fn record_idle_channels(count: usize) {
    metrics::gauge!(IDLE_CHANNELS).set(count as f64);
}
