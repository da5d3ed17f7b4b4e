use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{GridError, GridResult};

/// 配置校验接口
pub trait ConfigValidator {
    fn validate(&self) -> GridResult<()>;
}

/// 网络服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 节点连接监听地址
    pub node_bind_addr: String,
    /// 客户端连接监听地址
    pub client_bind_addr: String,
    /// 状态转换执行器线程上限（0 表示取可用CPU核数）
    pub transition_workers: usize,
    /// 单帧最大长度（MB）
    pub max_frame_len_mb: usize,
    /// 握手超时（秒）
    pub handshake_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_bind_addr: "0.0.0.0:11111".to_string(),
            client_bind_addr: "0.0.0.0:11112".to_string(),
            transition_workers: 0,
            max_frame_len_mb: 64,
            handshake_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for ServerConfig {
    fn validate(&self) -> GridResult<()> {
        if self.node_bind_addr.is_empty() || self.client_bind_addr.is_empty() {
            return Err(GridError::Configuration(
                "server 监听地址不能为空".to_string(),
            ));
        }
        if self.node_bind_addr == self.client_bind_addr {
            return Err(GridError::Configuration(
                "节点与客户端监听地址不能相同".to_string(),
            ));
        }
        if self.max_frame_len_mb == 0 || self.max_frame_len_mb > 1024 {
            return Err(GridError::Configuration(format!(
                "server.max_frame_len_mb 取值非法: {}",
                self.max_frame_len_mb
            )));
        }
        if self.handshake_timeout_seconds == 0 {
            return Err(GridError::Configuration(
                "server.handshake_timeout_seconds 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 分发与重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 单个任务束的最大重新入队次数，超过后任务以节点故障结束
    pub max_bundle_retries: u32,
    /// 重新入队的基础退避间隔（毫秒）
    pub retry_base_interval_ms: u64,
    /// 重新入队的最大退避间隔（毫秒）
    pub retry_max_interval_ms: u64,
    /// 指数退避倍数
    pub retry_backoff_multiplier: f64,
    /// 退避间隔的随机抖动范围（0.0-1.0）
    pub retry_jitter_factor: f64,
    /// 结果回送策略名（node / all）
    pub results_strategy: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_bundle_retries: 2,
            retry_base_interval_ms: 500,
            retry_max_interval_ms: 30_000,
            retry_backoff_multiplier: 2.0,
            retry_jitter_factor: 0.1,
            results_strategy: "node".to_string(),
        }
    }
}

impl ConfigValidator for DispatchConfig {
    fn validate(&self) -> GridResult<()> {
        if self.retry_base_interval_ms == 0 {
            return Err(GridError::Configuration(
                "dispatch.retry_base_interval_ms 必须大于0".to_string(),
            ));
        }
        if self.retry_max_interval_ms < self.retry_base_interval_ms {
            return Err(GridError::Configuration(
                "dispatch.retry_max_interval_ms 不能小于基础间隔".to_string(),
            ));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(GridError::Configuration(format!(
                "dispatch.retry_backoff_multiplier 取值非法: {}",
                self.retry_backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(GridError::Configuration(format!(
                "dispatch.retry_jitter_factor 必须在 [0.0, 1.0] 内: {}",
                self.retry_jitter_factor
            )));
        }
        let valid_strategies = ["node", "all"];
        if !valid_strategies.contains(&self.results_strategy.as_str()) {
            return Err(GridError::Configuration(format!(
                "无效的结果回送策略: {}，可选项: {:?}",
                self.results_strategy, valid_strategies
            )));
        }
        Ok(())
    }
}

/// 负载均衡配置
///
/// 算法名在启动时解析，未注册的算法名是配置错误而不是静默回退。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    /// 算法名（fixed_size / node_threads / proportional / rl）
    pub algorithm: String,
    /// profile名称，仅用于日志与管理查询展示
    pub profile: String,
    /// 算法参数，扁平键值对
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        let mut properties = HashMap::new();
        properties.insert("performance_cache_size".to_string(), "2000".to_string());
        properties.insert("proportionality_factor".to_string(), "1".to_string());
        properties.insert("initial_size".to_string(), "10".to_string());
        Self {
            algorithm: "proportional".to_string(),
            profile: "grid".to_string(),
            properties,
        }
    }
}

impl ConfigValidator for LoadBalancingConfig {
    fn validate(&self) -> GridResult<()> {
        if self.algorithm.is_empty() {
            return Err(GridError::Configuration(
                "load_balancing.algorithm 不能为空".to_string(),
            ));
        }
        // 算法名是否已注册由 BundlerRegistry 在启动时裁决
        Ok(())
    }
}
