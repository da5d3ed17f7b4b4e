use std::time::Duration;

use grid_core::config::models::DispatchConfig;
use rand::Rng;

/// 重新入队策略：重试上限与指数退避
///
/// 任务束因通道故障重入队列时，按已重试轮次计算一段退避窗口，
/// 窗口内该作业不参与分发，避免在抖动的通道之间来回弹跳。
#[derive(Debug, Clone)]
pub struct RequeuePolicy {
    /// 单个任务的最大重新入队次数，超过后以节点故障结束
    pub max_bundle_retries: u32,
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// 抖动比例，落在 `[0.0, 1.0]`
    pub jitter_factor: f64,
}

impl RequeuePolicy {
    pub fn from_config(cfg: &DispatchConfig) -> Self {
        Self {
            max_bundle_retries: cfg.max_bundle_retries,
            base_interval: Duration::from_millis(cfg.retry_base_interval_ms),
            max_interval: Duration::from_millis(cfg.retry_max_interval_ms),
            multiplier: cfg.retry_backoff_multiplier,
            jitter_factor: cfg.retry_jitter_factor,
        }
    }

    /// 测试与内嵌场景用的零退避策略
    pub fn immediate(max_bundle_retries: u32) -> Self {
        Self {
            max_bundle_retries,
            base_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// 第 `retry_round` 轮重入的退避窗口（首轮为1）
    pub fn backoff(&self, retry_round: u32) -> Duration {
        if self.base_interval.is_zero() {
            return Duration::ZERO;
        }
        let exp = self.multiplier.powi(retry_round.saturating_sub(1) as i32);
        let mut millis = (self.base_interval.as_millis() as f64 * exp)
            .min(self.max_interval.as_millis() as f64);

        if self.jitter_factor > 0.0 {
            let spread = millis * self.jitter_factor;
            let jitter = rand::rng().random_range(-spread..=spread);
            millis = (millis + jitter).max(0.0);
        }
        Duration::from_millis(millis as u64)
    }
}
