//! 端到端：真实TCP上的节点/客户端通道

use std::sync::Arc;
use std::time::Duration;

use grid_balancer::{BundlerRegistry, LoadBalancerSettings};
use grid_core::config::AppConfig;
use grid_core::models::{NodeSystemInfo, Task, TaskOutcome, WireMessage};
use grid_core::TypedProps;
use grid_dispatcher::queue::JobQueue;
use grid_dispatcher::retry::RequeuePolicy;
use grid_dispatcher::scheduler::JobScheduler;
use grid_dispatcher::test_utils::make_job;
use grid_server::frame::{read_frame, write_frame};
use grid_server::GridServer;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

const MAX_FRAME: usize = 64 * 1024 * 1024;
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    server: Arc<GridServer>,
    shutdown: broadcast::Sender<()>,
}

async fn start(results_strategy: &str, bundle_size: usize) -> Harness {
    let mut config = AppConfig::default();
    config.server.node_bind_addr = "127.0.0.1:0".to_string();
    config.server.client_bind_addr = "127.0.0.1:0".to_string();
    config.dispatch.results_strategy = results_strategy.to_string();
    config.dispatch.retry_base_interval_ms = 1;
    config.load_balancing.algorithm = "fixed_size".to_string();
    config
        .load_balancing
        .properties
        .insert("size".to_string(), bundle_size.to_string());

    let registry = BundlerRegistry::new(LoadBalancerSettings {
        algorithm: config.load_balancing.algorithm.clone(),
        profile: config.load_balancing.profile.clone(),
        properties: TypedProps::from(config.load_balancing.properties.clone()),
    });
    registry.init().unwrap();

    let queue = Arc::new(JobQueue::new(RequeuePolicy::from_config(&config.dispatch)));
    let scheduler = Arc::new(JobScheduler::new(queue, Arc::new(registry)));
    let server = Arc::new(GridServer::bind(&config, Arc::clone(&scheduler)).await.unwrap());

    let (shutdown, _) = broadcast::channel(1);
    {
        let server = Arc::clone(&server);
        let rx = shutdown.subscribe();
        tokio::spawn(async move { server.run(rx).await });
    }
    {
        let rx = shutdown.subscribe();
        tokio::spawn(async move { scheduler.run(rx).await });
    }
    Harness { server, shutdown }
}

async fn recv(stream: &mut TcpStream) -> WireMessage {
    let payload = timeout(WAIT, read_frame(stream, MAX_FRAME))
        .await
        .expect("读消息超时")
        .unwrap()
        .expect("连接意外关闭");
    WireMessage::decode(&payload).unwrap()
}

async fn send(stream: &mut TcpStream, msg: &WireMessage) {
    write_frame(stream, &msg.encode().unwrap()).await.unwrap();
}

async fn connect_node(harness: &Harness, node_uuid: &str, threads: u32) -> TcpStream {
    let mut stream = TcpStream::connect(harness.server.node_addr().unwrap())
        .await
        .unwrap();
    send(&mut stream, &WireMessage::NodeHandshake {
        system_info: NodeSystemInfo::new(node_uuid, "localhost", threads),
    })
    .await;
    match recv(&mut stream).await {
        WireMessage::HandshakeAck { driver_uuid } => assert!(!driver_uuid.is_empty()),
        other => panic!("期望握手回应, 得到 {other:?}"),
    }
    stream
}

async fn connect_client(harness: &Harness, client_uuid: &str) -> TcpStream {
    let mut stream = TcpStream::connect(harness.server.client_addr().unwrap())
        .await
        .unwrap();
    send(&mut stream, &WireMessage::ClientHandshake {
        client_uuid: client_uuid.to_string(),
    })
    .await;
    match recv(&mut stream).await {
        WireMessage::HandshakeAck { .. } => {}
        other => panic!("期望握手回应, 得到 {other:?}"),
    }
    stream
}

fn execute(tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .cloned()
        .map(|mut t| {
            t.outcome = Some(TaskOutcome::Result(vec![t.position as u8]));
            t
        })
        .collect()
}

#[tokio::test]
async fn test_submit_execute_return_results() {
    let harness = start("node", 10).await;
    let mut node = connect_node(&harness, "node-1", 4).await;
    let mut client = connect_client(&harness, "client-1").await;

    send(&mut client, &WireMessage::JobSubmit {
        job: make_job("job-1", 3),
    })
    .await;
    match recv(&mut client).await {
        WireMessage::JobAccepted { job_uuid } => assert_eq!(job_uuid, "job-1"),
        other => panic!("期望作业受理, 得到 {other:?}"),
    }

    let bundle = match recv(&mut node).await {
        WireMessage::BundleDispatch { bundle } => bundle,
        other => panic!("期望任务束, 得到 {other:?}"),
    };
    assert_eq!(bundle.job_uuid, "job-1");
    assert_eq!(bundle.task_count(), 3);

    send(&mut node, &WireMessage::BundleResult {
        bundle_uuid: bundle.bundle_uuid.clone(),
        job_uuid: bundle.job_uuid.clone(),
        tasks: execute(&bundle.tasks),
    })
    .await;

    match recv(&mut client).await {
        WireMessage::TaskResults {
            job_uuid,
            tasks,
            complete,
        } => {
            assert_eq!(job_uuid, "job-1");
            assert!(complete);
            let positions: Vec<usize> = tasks.iter().map(|t| t.position).collect();
            assert_eq!(positions, vec![0, 1, 2]);
            assert!(tasks.iter().all(|t| t.outcome.is_some()));
        }
        other => panic!("期望任务结果, 得到 {other:?}"),
    }
    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn test_invalid_job_rejected() {
    let harness = start("node", 10).await;
    let mut client = connect_client(&harness, "client-1").await;

    let mut job = make_job("bad-job", 2);
    job.tasks[1].position = 9; // position 不连续
    send(&mut client, &WireMessage::JobSubmit { job }).await;
    match recv(&mut client).await {
        WireMessage::JobRejected { job_uuid, reason } => {
            assert_eq!(job_uuid, "bad-job");
            assert!(!reason.is_empty());
        }
        other => panic!("期望拒绝, 得到 {other:?}"),
    }
    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn test_node_disconnect_redispatches_to_second_node() {
    let harness = start("node", 10).await;
    let mut client = connect_client(&harness, "client-1").await;
    let mut node1 = connect_node(&harness, "node-1", 4).await;

    send(&mut client, &WireMessage::JobSubmit {
        job: make_job("job-1", 2),
    })
    .await;
    recv(&mut client).await; // JobAccepted

    let bundle = match recv(&mut node1).await {
        WireMessage::BundleDispatch { bundle } => bundle,
        other => panic!("期望任务束, 得到 {other:?}"),
    };
    assert_eq!(bundle.retry_count, 0);
    // 节点1在返回结果前断开
    drop(node1);

    let mut node2 = connect_node(&harness, "node-2", 4).await;
    let bundle = match recv(&mut node2).await {
        WireMessage::BundleDispatch { bundle } => bundle,
        other => panic!("期望重新分发的任务束, 得到 {other:?}"),
    };
    assert_eq!(bundle.retry_count, 1);
    let positions: Vec<usize> = bundle.tasks.iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 1]);

    send(&mut node2, &WireMessage::BundleResult {
        bundle_uuid: bundle.bundle_uuid.clone(),
        job_uuid: bundle.job_uuid.clone(),
        tasks: execute(&bundle.tasks),
    })
    .await;
    match recv(&mut client).await {
        WireMessage::TaskResults { complete, tasks, .. } => {
            assert!(complete);
            assert_eq!(tasks.len(), 2);
        }
        other => panic!("期望任务结果, 得到 {other:?}"),
    }
    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn test_all_strategy_sends_single_final_batch() {
    let harness = start("all", 2).await;
    let mut client = connect_client(&harness, "client-1").await;
    let mut node = connect_node(&harness, "node-1", 4).await;

    send(&mut client, &WireMessage::JobSubmit {
        job: make_job("job-1", 4),
    })
    .await;
    recv(&mut client).await; // JobAccepted

    // 同一节点顺序跑完两束
    for _ in 0..2 {
        let bundle = match recv(&mut node).await {
            WireMessage::BundleDispatch { bundle } => bundle,
            other => panic!("期望任务束, 得到 {other:?}"),
        };
        assert_eq!(bundle.task_count(), 2);
        send(&mut node, &WireMessage::BundleResult {
            bundle_uuid: bundle.bundle_uuid.clone(),
            job_uuid: bundle.job_uuid.clone(),
            tasks: execute(&bundle.tasks),
        })
        .await;
    }

    // all 策略只在最后一批回送, 且带全量结果
    match recv(&mut client).await {
        WireMessage::TaskResults { tasks, complete, .. } => {
            assert!(complete);
            let positions: Vec<usize> = tasks.iter().map(|t| t.position).collect();
            assert_eq!(positions, vec![0, 1, 2, 3]);
        }
        other => panic!("期望一次性全量结果, 得到 {other:?}"),
    }
    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn test_admin_change_and_query_load_balancer() {
    let harness = start("node", 3).await;
    let mut client = connect_client(&harness, "admin").await;

    send(&mut client, &WireMessage::AdminQueryLoadBalancer).await;
    match recv(&mut client).await {
        WireMessage::AdminLoadBalancerSettings { algorithm, .. } => {
            assert_eq!(algorithm, "fixed_size");
        }
        other => panic!("期望设置查询结果, 得到 {other:?}"),
    }

    // 非法参数被拒, 设置不变
    let mut bad = std::collections::HashMap::new();
    bad.insert("size".to_string(), "0".to_string());
    send(&mut client, &WireMessage::AdminChangeLoadBalancer {
        algorithm: "fixed_size".to_string(),
        properties: bad,
    })
    .await;
    assert!(matches!(recv(&mut client).await, WireMessage::AdminError { .. }));

    let mut good = std::collections::HashMap::new();
    good.insert("multiplicator".to_string(), "2".to_string());
    send(&mut client, &WireMessage::AdminChangeLoadBalancer {
        algorithm: "node_threads".to_string(),
        properties: good,
    })
    .await;
    assert!(matches!(recv(&mut client).await, WireMessage::AdminOk));

    send(&mut client, &WireMessage::AdminQueryLoadBalancer).await;
    match recv(&mut client).await {
        WireMessage::AdminLoadBalancerSettings { algorithm, .. } => {
            assert_eq!(algorithm, "node_threads");
        }
        other => panic!("期望设置查询结果, 得到 {other:?}"),
    }
    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn test_cancel_keeps_channel_usable_for_next_job() {
    let harness = start("node", 10).await;
    let mut client = connect_client(&harness, "client-1").await;
    let mut node = connect_node(&harness, "node-1", 4).await;

    send(&mut client, &WireMessage::JobSubmit {
        job: make_job("job-1", 2),
    })
    .await;
    recv(&mut client).await; // JobAccepted

    let bundle = match recv(&mut node).await {
        WireMessage::BundleDispatch { bundle } => bundle,
        other => panic!("期望任务束, 得到 {other:?}"),
    };

    // 在途取消: 节点收到取消信号, 客户端收到确认与取消结果
    send(&mut client, &WireMessage::CancelJob {
        job_uuid: "job-1".to_string(),
    })
    .await;
    match recv(&mut node).await {
        WireMessage::CancelBundle { bundle_uuid } => {
            assert_eq!(bundle_uuid, bundle.bundle_uuid);
        }
        other => panic!("期望取消信号, 得到 {other:?}"),
    }
    for _ in 0..2 {
        match recv(&mut client).await {
            WireMessage::AdminOk => {}
            WireMessage::TaskResults { complete, .. } => assert!(complete),
            other => panic!("意外消息: {other:?}"),
        }
    }

    // 同一通道必须能继续接后续作业
    send(&mut client, &WireMessage::JobSubmit {
        job: make_job("job-2", 2),
    })
    .await;
    recv(&mut client).await; // JobAccepted

    let bundle = match recv(&mut node).await {
        WireMessage::BundleDispatch { bundle } => bundle,
        other => panic!("期望取消后重新分发的任务束, 得到 {other:?}"),
    };
    assert_eq!(bundle.job_uuid, "job-2");

    send(&mut node, &WireMessage::BundleResult {
        bundle_uuid: bundle.bundle_uuid.clone(),
        job_uuid: bundle.job_uuid.clone(),
        tasks: execute(&bundle.tasks),
    })
    .await;
    match recv(&mut client).await {
        WireMessage::TaskResults { job_uuid, complete, .. } => {
            assert_eq!(job_uuid, "job-2");
            assert!(complete);
        }
        other => panic!("期望任务结果, 得到 {other:?}"),
    }
    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn test_cancel_job_resolves_tasks_as_cancelled() {
    // 没有节点在线, 作业停在队列里
    let harness = start("node", 10).await;
    let mut client = connect_client(&harness, "client-1").await;

    send(&mut client, &WireMessage::JobSubmit {
        job: make_job("job-1", 2),
    })
    .await;
    recv(&mut client).await; // JobAccepted

    send(&mut client, &WireMessage::CancelJob {
        job_uuid: "job-1".to_string(),
    })
    .await;

    // AdminOk 与取消结果两条消息, 顺序不保证
    let mut saw_ok = false;
    let mut saw_results = false;
    for _ in 0..2 {
        match recv(&mut client).await {
            WireMessage::AdminOk => saw_ok = true,
            WireMessage::TaskResults { tasks, complete, .. } => {
                assert!(complete);
                assert!(tasks.iter().all(|t| t.cancelled));
                saw_results = true;
            }
            other => panic!("意外消息: {other:?}"),
        }
    }
    assert!(saw_ok && saw_results);
    let _ = harness.shutdown.send(());
}
