use grid_core::{GridError, GridResult, TypedProps};

use crate::bundler::Bundler;

pub const ALGORITHM: &str = "fixed_size";

/// 固定大小算法的profile
#[derive(Debug, Clone)]
pub struct FixedSizeProfile {
    pub size: usize,
}

impl FixedSizeProfile {
    pub fn from_props(props: &TypedProps) -> GridResult<Self> {
        let size = match props.try_get_i64("size") {
            Some(Ok(v)) if v >= 1 => v as usize,
            Some(Ok(v)) => {
                return Err(GridError::Configuration(format!(
                    "fixed_size 的 size 必须不小于1: {v}"
                )))
            }
            Some(Err(msg)) => return Err(GridError::Configuration(msg)),
            None => 1,
        };
        Ok(Self { size })
    }
}

/// 固定大小：始终返回配置的常量，不需要反馈
#[derive(Debug, Clone)]
pub struct FixedSizeBundler {
    profile: FixedSizeProfile,
}

impl FixedSizeBundler {
    pub fn new(profile: FixedSizeProfile) -> Self {
        Self { profile }
    }
}

impl Bundler for FixedSizeBundler {
    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    fn bundle_size(&self) -> usize {
        self.profile.size
    }

    fn clone_bundler(&self) -> Box<dyn Bundler> {
        Box::new(self.clone())
    }
}
