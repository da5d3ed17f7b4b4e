use std::collections::VecDeque;
use std::time::Duration;

use grid_core::models::NodeSystemInfo;

/// 负载均衡算法实例，决定下一次向通道分发多少任务
///
/// 每个通道在接入时通过注册表获得自己的实例（copy-on-attach），
/// 之后只被该通道的反馈路径修改；进程级共享的算法自行持锁。
pub trait Bundler: Send {
    /// 算法名
    fn algorithm(&self) -> &str;

    /// 下一次分发的任务数
    ///
    /// 在两次 `feedback` 之间重复调用必须返回相同的值。
    fn bundle_size(&self) -> usize;

    /// 一次分发完成后的耗时反馈
    ///
    /// `sample_size == 0` 或 `total_time` 为零视为测量噪声，忽略。
    fn feedback(&mut self, _sample_size: usize, _total_time: Duration) {}

    /// 返回值上限，`None` 表示不设上限（只受剩余任务数约束）
    fn max_size(&self) -> Option<usize> {
        None
    }

    /// 由调度器注入的全局上限（通常取队列中最大作业的任务数）
    fn set_max_size(&mut self, _max: usize) {}

    /// 通道感知：节点上报系统信息后回调
    fn update_node_info(&mut self, _info: &NodeSystemInfo) {}

    /// 以相同profile创建一份独立实例，估计状态不共享
    fn clone_bundler(&self) -> Box<dyn Bundler>;
}

/// 单次任务束的性能样本：每任务平均耗时与任务数
#[derive(Debug, Clone, Copy)]
pub struct PerformanceSample {
    pub mean_time: f64,
    pub size: usize,
}

/// 有界的性能样本缓存
///
/// 维护加权平均的每任务耗时（纳秒），供自适应算法比较
/// 相邻两次反馈之间的均值变化。
#[derive(Debug, Clone)]
pub struct PerformanceCache {
    capacity: usize,
    samples: VecDeque<PerformanceSample>,
    mean: f64,
    previous_mean: f64,
}

impl PerformanceCache {
    pub fn new(capacity: usize, initial_mean: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
            mean: initial_mean,
            previous_mean: initial_mean,
        }
    }

    /// 记录一次样本；非法输入直接丢弃，不得污染均值
    pub fn add_sample(&mut self, size: usize, total_time: Duration) {
        if size == 0 || total_time.is_zero() {
            return;
        }
        let mean_time = total_time.as_nanos() as f64 / size as f64;
        self.samples.push_back(PerformanceSample { mean_time, size });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.previous_mean = self.mean;
        self.recompute();
    }

    fn recompute(&mut self) {
        let mut weighted = 0.0;
        let mut total = 0usize;
        for s in &self.samples {
            weighted += s.mean_time * s.size as f64;
            total += s.size;
        }
        if total > 0 {
            self.mean = weighted / total as f64;
        }
    }

    /// 加权平均的每任务耗时（纳秒）
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// 上一次反馈前的均值
    pub fn previous_mean(&self) -> f64 {
        self.previous_mean
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// 自适应算法共用的钳制：size 落入 `[1, max]`
pub(crate) fn clamp_size(size: i64, max: Option<usize>) -> usize {
    let lower = size.max(1) as usize;
    match max {
        Some(m) if m >= 1 => lower.min(m),
        _ => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_ignores_noise() {
        let mut cache = PerformanceCache::new(10, 1e9);
        cache.add_sample(0, Duration::from_millis(5));
        cache.add_sample(5, Duration::ZERO);
        assert_eq!(cache.sample_count(), 0);
        assert_eq!(cache.mean(), 1e9);
    }

    #[test]
    fn test_cache_weighted_mean() {
        let mut cache = PerformanceCache::new(10, 1e9);
        // 4个任务共400ms → 每任务1e8ns
        cache.add_sample(4, Duration::from_millis(400));
        assert!((cache.mean() - 1e8).abs() < 1.0);
        assert_eq!(cache.previous_mean(), 1e9);

        // 再来4个任务共40ms → 均值下降
        cache.add_sample(4, Duration::from_millis(40));
        assert!(cache.mean() < cache.previous_mean());
    }

    #[test]
    fn test_cache_bounded() {
        let mut cache = PerformanceCache::new(2, 0.0);
        for _ in 0..5 {
            cache.add_sample(1, Duration::from_millis(1));
        }
        assert_eq!(cache.sample_count(), 2);
    }

    #[test]
    fn test_clamp_size() {
        assert_eq!(clamp_size(-3, None), 1);
        assert_eq!(clamp_size(0, Some(10)), 1);
        assert_eq!(clamp_size(50, Some(10)), 10);
        assert_eq!(clamp_size(50, None), 50);
    }
}
