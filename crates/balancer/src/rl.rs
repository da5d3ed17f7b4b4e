use std::time::Duration;

use grid_core::{GridError, GridResult, TypedProps};
use tracing::debug;

use crate::bundler::{clamp_size, Bundler, PerformanceCache};

pub const ALGORITHM: &str = "rl";

/// rl 算法的profile
#[derive(Debug, Clone)]
pub struct RlProfile {
    pub performance_cache_size: usize,
    /// 动作幅度上限（每轮大小增减的最大步数）
    pub increase_range: i32,
    pub initial_size: usize,
}

impl RlProfile {
    pub fn from_props(props: &TypedProps) -> GridResult<Self> {
        let cache_size = match props.try_get_i64("performance_cache_size") {
            Some(Ok(v)) if v >= 1 => v as usize,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "rl 的 performance_cache_size 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 100,
        };
        let increase_range = match props.try_get_i64("increase_range") {
            Some(Ok(v)) if v >= 1 => v as i32,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "rl 的 increase_range 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 20,
        };
        let initial_size = match props.try_get_i64("initial_size") {
            Some(Ok(v)) if v >= 1 => v as usize,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "rl 的 initial_size 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 1,
        };
        Ok(Self {
            performance_cache_size: cache_size,
            increase_range,
            initial_size,
        })
    }
}

const STEP: i32 = 1;

/// 带符号动作的自整定算法
///
/// 均值改善时沿当前方向加大动作，退化时反向并减半，
/// 大小始终钳制在 `[1, max]` 内。
pub struct RlBundler {
    profile: RlProfile,
    cache: PerformanceCache,
    /// 当前动作：下一轮大小的增减量
    action: i32,
    bundle_size: usize,
    prev_bundle_size: usize,
    max_size: Option<usize>,
}

impl RlBundler {
    pub fn new(profile: RlProfile) -> Self {
        let action = profile.increase_range;
        let bundle_size = profile.initial_size;
        Self {
            // 首个样本前的保守均值估计，首次真实反馈按改善处理
            cache: PerformanceCache::new(profile.performance_cache_size, 1e9),
            profile,
            action,
            bundle_size,
            prev_bundle_size: bundle_size,
            max_size: None,
        }
    }

    fn signum(v: i32) -> i32 {
        match v {
            0 => 1,
            v if v > 0 => 1,
            _ => -1,
        }
    }
}

impl Bundler for RlBundler {
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

        let delta = self.cache.previous_mean() - self.cache.mean();
        if delta > 0.0 {
            // 均值下降：吞吐改善，沿当前方向继续
            self.action += Self::signum(self.action) * STEP;
        } else if delta < 0.0 {
            // 均值上升：退化，反向并减半
            self.action = -Self::signum(self.action) * STEP.max(self.action.abs() / 2);
        }
        let range = self.profile.increase_range;
        self.action = self.action.clamp(-range, range);

        self.prev_bundle_size = self.bundle_size;
        let next = self.bundle_size as i64 + self.action as i64;
        self.bundle_size = clamp_size(next, self.max_size);

        debug!(
            "rl bundler 动作 {}, 大小 {} -> {}",
            self.action, self.prev_bundle_size, self.bundle_size
        );
    }

    fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    fn set_max_size(&mut self, max: usize) {
        if max >= 1 {
            self.max_size = Some(max);
            self.bundle_size = self.bundle_size.min(max);
        }
    }

    fn clone_bundler(&self) -> Box<dyn Bundler> {
        Box::new(Self::new(self.profile.clone()))
    }
}
