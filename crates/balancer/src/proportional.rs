use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grid_core::{GridError, GridResult, TypedProps};
use tracing::debug;

use crate::bundler::{clamp_size, Bundler, PerformanceCache};

pub const ALGORITHM: &str = "proportional";

static NEXT_BUNDLER_ID: AtomicU64 = AtomicU64::new(1);

/// proportional 算法的profile
#[derive(Debug, Clone)]
pub struct ProportionalProfile {
    pub performance_cache_size: usize,
    pub proportionality_factor: i32,
    pub initial_size: usize,
    /// 初始每任务平均耗时（纳秒），首个样本前的保守估计
    pub initial_mean_time: f64,
}

impl ProportionalProfile {
    pub fn from_props(props: &TypedProps) -> GridResult<Self> {
        let cache_size = match props.try_get_i64("performance_cache_size") {
            Some(Ok(v)) if v >= 1 => v as usize,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "proportional 的 performance_cache_size 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 2000,
        };
        let factor = match props.try_get_i64("proportionality_factor") {
            Some(Ok(v)) if v >= 1 => v as i32,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "proportional 的 proportionality_factor 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 1,
        };
        let initial_size = match props.try_get_i64("initial_size") {
            Some(Ok(v)) if v >= 1 => v as usize,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "proportional 的 initial_size 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 10,
        };
        let initial_mean_time = match props.try_get_f64("initial_mean_time") {
            Some(Ok(v)) if v > 0.0 => v,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "proportional 的 initial_mean_time 必须为正: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 1e9,
        };
        Ok(Self {
            performance_cache_size: cache_size,
            proportionality_factor: factor,
            initial_size,
            initial_mean_time,
        })
    }
}

/// 进程级共享的均值表：bundler id → 当前每任务平均耗时
///
/// proportional 是文档注明的进程级算法，各实例在反馈时
/// 持锁读写此表，其余状态仍然实例私有。
pub type SharedMeans = Arc<Mutex<HashMap<u64, f64>>>;

/// 按相对吞吐比例瓜分全局上限
///
/// 每个通道的份额与 `(1/mean)^factor` 成正比：跑得越快的
/// 通道下一轮拿到越大的任务束。
pub struct ProportionalBundler {
    profile: ProportionalProfile,
    id: u64,
    cache: PerformanceCache,
    shared: SharedMeans,
    bundle_size: usize,
    max_size: Option<usize>,
}

impl ProportionalBundler {
    pub fn new(profile: ProportionalProfile, shared: SharedMeans) -> Self {
        let id = NEXT_BUNDLER_ID.fetch_add(1, Ordering::Relaxed);
        let cache = PerformanceCache::new(profile.performance_cache_size, profile.initial_mean_time);
        let bundle_size = profile.initial_size;
        shared
            .lock()
            .expect("共享均值表锁中毒")
            .insert(id, profile.initial_mean_time);
        Self {
            profile,
            id,
            cache,
            shared,
            bundle_size,
            max_size: None,
        }
    }

    fn recompute(&mut self) {
        // 全局上限未知时保持当前大小不变
        let Some(max) = self.max_size else {
            return;
        };
        let factor = self.profile.proportionality_factor;
        let weight = |mean: f64| {
            if mean <= 0.0 {
                0.0
            } else {
                (1.0 / mean).powi(factor)
            }
        };

        let (own, total) = {
            let means = self.shared.lock().expect("共享均值表锁中毒");
            let own = weight(*means.get(&self.id).unwrap_or(&self.profile.initial_mean_time));
            let total: f64 = means.values().map(|m| weight(*m)).sum();
            (own, total)
        };

        let proportion = if total > 0.0 { own / total } else { 0.0 };
        self.bundle_size = clamp_size((proportion * max as f64) as i64, Some(max));
        debug!(
            "proportional bundler#{} 份额 {:.3}, 新大小 {}",
            self.id, proportion, self.bundle_size
        );
    }
}

impl Bundler for ProportionalBundler {
    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    fn bundle_size(&self) -> usize {
        self.bundle_size
    }

    fn feedback(&mut self, sample_size: usize, total_time: Duration) {
        if sample_size == 0 || total_time.is_zero() {
            return;
        }
        self.cache.add_sample(sample_size, total_time);
        self.shared
            .lock()
            .expect("共享均值表锁中毒")
            .insert(self.id, self.cache.mean());
        self.recompute();
    }

    fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    fn set_max_size(&mut self, max: usize) {
        if max >= 1 && self.max_size != Some(max) {
            self.max_size = Some(max);
            self.recompute();
        }
    }

    fn clone_bundler(&self) -> Box<dyn Bundler> {
        Box::new(Self::new(self.profile.clone(), Arc::clone(&self.shared)))
    }
}

impl Drop for ProportionalBundler {
    fn drop(&mut self) {
        if let Ok(mut means) = self.shared.lock() {
            means.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_shared() -> SharedMeans {
        Arc::new(Mutex::new(HashMap::new()))
    }

    fn default_profile() -> ProportionalProfile {
        ProportionalProfile::from_props(&TypedProps::new()).unwrap()
    }

    #[test]
    fn test_initial_size_before_feedback() {
        let bundler = ProportionalBundler::new(default_profile(), new_shared());
        assert_eq!(bundler.bundle_size(), 10);
        // 反馈之前重复取值恒定
        assert_eq!(bundler.bundle_size(), bundler.bundle_size());
    }

    #[test]
    fn test_faster_channel_gets_bigger_share() {
        let shared = new_shared();
        let mut fast = ProportionalBundler::new(default_profile(), Arc::clone(&shared));
        let mut slow = ProportionalBundler::new(default_profile(), Arc::clone(&shared));
        fast.set_max_size(100);
        slow.set_max_size(100);

        // fast 每任务1ms，slow 每任务10ms
        fast.feedback(10, Duration::from_millis(10));
        slow.feedback(10, Duration::from_millis(100));
        // 相互可见后重算
        fast.feedback(10, Duration::from_millis(10));
        slow.feedback(10, Duration::from_millis(100));

        assert!(fast.bundle_size() > slow.bundle_size());
        assert!(fast.bundle_size() <= 100);
        assert!(slow.bundle_size() >= 1);
    }

    #[test]
    fn test_noise_feedback_ignored() {
        let mut bundler = ProportionalBundler::new(default_profile(), new_shared());
        bundler.set_max_size(50);
        let before = bundler.bundle_size();
        bundler.feedback(0, Duration::from_millis(10));
        bundler.feedback(5, Duration::ZERO);
        assert_eq!(bundler.bundle_size(), before);
    }

    #[test]
    fn test_drop_releases_shared_entry() {
        let shared = new_shared();
        {
            let _bundler = ProportionalBundler::new(default_profile(), Arc::clone(&shared));
            assert_eq!(shared.lock().unwrap().len(), 1);
        }
        assert!(shared.lock().unwrap().is_empty());
    }
}
