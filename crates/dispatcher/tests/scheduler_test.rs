//! 调度器与通道表的集成测试

use std::sync::Arc;

use grid_balancer::{BundlerRegistry, LoadBalancerSettings};
use grid_core::models::NodeSystemInfo;
use grid_core::{GridError, TypedProps};
use grid_dispatcher::queue::JobQueue;
use grid_dispatcher::retry::RequeuePolicy;
use grid_dispatcher::scheduler::JobScheduler;
use grid_dispatcher::test_utils::{fixed_registry, make_job, MockNodeChannel};

fn new_scheduler(bundle_size: usize) -> JobScheduler {
    let queue = Arc::new(JobQueue::new(RequeuePolicy::immediate(2)));
    JobScheduler::new(queue, fixed_registry(bundle_size))
}

#[tokio::test]
async fn test_dispatch_round_feeds_all_idle_channels() {
    let scheduler = new_scheduler(5);
    let ch1 = MockNodeChannel::new(1);
    let ch2 = MockNodeChannel::new(2);
    scheduler.register_channel(ch1.clone()).await.unwrap();
    scheduler.register_channel(ch2.clone()).await.unwrap();
    assert_eq!(scheduler.idle_channel_count().await, 2);

    scheduler.submit_job(make_job("job-1", 10)).unwrap();
    assert!(scheduler.dispatch_round().await);

    // 两个通道各拿到一束, 任务无重复无遗漏
    assert_eq!(ch1.delivered_count(), 1);
    assert_eq!(ch2.delivered_count(), 1);
    let total: usize = [&ch1, &ch2]
        .iter()
        .flat_map(|c| c.delivered.lock().unwrap().iter().map(|b| b.task_count()).collect::<Vec<_>>())
        .sum();
    assert_eq!(total, 10);
    assert_eq!(scheduler.idle_channel_count().await, 0);

    // 没有剩余工作的轮次不派发
    assert!(!scheduler.dispatch_round().await);
}

#[tokio::test]
async fn test_delivery_failure_removes_channel_and_requeues() {
    let scheduler = new_scheduler(10);
    let bad = MockNodeChannel::new(1);
    bad.set_fail_delivery(true);
    scheduler.register_channel(bad.clone()).await.unwrap();

    let mut rx = scheduler.submit_job(make_job("job-1", 4)).unwrap();
    assert!(!scheduler.dispatch_round().await);
    // 投递失败的通道被移除, 任务回到队列
    assert_eq!(scheduler.channel_count().await, 0);
    assert_eq!(scheduler.queue().pending_task_count(), 4);

    let good = MockNodeChannel::new(2);
    scheduler.register_channel(good.clone()).await.unwrap();
    assert!(scheduler.dispatch_round().await);

    let delivered = good.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].task_count(), 4);
    let positions: Vec<usize> = delivered[0].tasks.iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    assert_eq!(delivered[0].retry_count, 1);
    drop(delivered);

    // 作业尚未解析, 没有事件
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_register_with_unknown_algorithm_refused() {
    let registry = BundlerRegistry::new(LoadBalancerSettings {
        algorithm: "unknown_algo".to_string(),
        profile: "test".to_string(),
        properties: TypedProps::new(),
    });
    registry.register_builtins().unwrap();
    let queue = Arc::new(JobQueue::new(RequeuePolicy::immediate(2)));
    let scheduler = JobScheduler::new(queue, Arc::new(registry));

    let err = scheduler
        .register_channel(MockNodeChannel::new(1))
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Configuration(_)));
    // 拒绝接入不留半注册状态
    assert_eq!(scheduler.channel_count().await, 0);
}

#[tokio::test]
async fn test_cancel_signals_node_and_frees_channel() {
    let scheduler = new_scheduler(10);
    let ch = MockNodeChannel::new(1);
    scheduler.register_channel(ch.clone()).await.unwrap();

    let mut rx = scheduler.submit_job(make_job("job-1", 3)).unwrap();
    assert!(scheduler.dispatch_round().await);
    let bundle_uuid = ch.delivered.lock().unwrap()[0].bundle_uuid.clone();

    scheduler.cancel_job("job-1").await.unwrap();
    assert_eq!(*ch.cancels.lock().unwrap(), vec![bundle_uuid]);
    assert_eq!(scheduler.idle_channel_count().await, 1);

    let ev = rx.try_recv().unwrap();
    assert!(ev.complete);
    assert!(ev.tasks.iter().all(|t| t.cancelled));
}

#[tokio::test]
async fn test_change_load_balancer_rebuilds_channel_bundlers() {
    let scheduler = new_scheduler(2);
    let ch = MockNodeChannel::new(1);
    scheduler.register_channel(ch.clone()).await.unwrap();

    let props: TypedProps = [("size", "7")].into_iter().collect();
    scheduler
        .change_load_balancer("fixed_size", props)
        .await
        .unwrap();

    scheduler.submit_job(make_job("job-1", 10)).unwrap();
    assert!(scheduler.dispatch_round().await);
    assert_eq!(ch.delivered.lock().unwrap()[0].task_count(), 7);
}

#[tokio::test]
async fn test_change_load_balancer_rejects_bad_settings() {
    let scheduler = new_scheduler(2);
    let bad: TypedProps = [("size", "0")].into_iter().collect();
    assert!(scheduler
        .change_load_balancer("fixed_size", bad)
        .await
        .is_err());
    // 旧设置原样生效
    let ch = MockNodeChannel::new(1);
    scheduler.register_channel(ch.clone()).await.unwrap();
    scheduler.submit_job(make_job("job-1", 10)).unwrap();
    scheduler.dispatch_round().await;
    assert_eq!(ch.delivered.lock().unwrap()[0].task_count(), 2);
}

#[tokio::test]
async fn test_bundle_returned_completes_job_and_frees_channel() {
    let scheduler = new_scheduler(5);
    let ch = MockNodeChannel::new(1);
    scheduler.register_channel(ch.clone()).await.unwrap();

    let mut rx = scheduler.submit_job(make_job("job-1", 3)).unwrap();
    assert!(scheduler.dispatch_round().await);
    let bundle = ch.delivered.lock().unwrap()[0].clone();

    let complete = scheduler
        .bundle_returned(1, "job-1", &bundle.bundle_uuid, MockNodeChannel::complete_bundle(&bundle))
        .await
        .unwrap();
    assert!(complete);
    assert_eq!(scheduler.idle_channel_count().await, 1);
    assert!(!scheduler.queue().has_job("job-1"));

    let ev = rx.try_recv().unwrap();
    assert!(ev.complete);
    assert_eq!(ev.tasks.len(), 3);
}

#[tokio::test]
async fn test_remove_channel_requeues_inflight_work() {
    let scheduler = new_scheduler(10);
    let ch = MockNodeChannel::with_info(1, NodeSystemInfo::new("n-1", "localhost", 8));
    scheduler.register_channel(ch.clone()).await.unwrap();

    scheduler.submit_job(make_job("job-1", 4)).unwrap();
    assert!(scheduler.dispatch_round().await);
    assert_eq!(scheduler.queue().pending_task_count(), 0);

    let requeued = scheduler.remove_channel(1).await;
    assert_eq!(requeued, 1);
    assert_eq!(scheduler.queue().pending_task_count(), 4);
    assert_eq!(scheduler.channel_count().await, 0);
}
