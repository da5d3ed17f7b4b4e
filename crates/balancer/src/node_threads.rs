use grid_core::models::NodeSystemInfo;
use grid_core::{GridError, GridResult, TypedProps};
use tracing::debug;

use crate::bundler::Bundler;

pub const ALGORITHM: &str = "node_threads";

/// node_threads 算法的profile
#[derive(Debug, Clone)]
pub struct NodeThreadsProfile {
    /// 大小 = 节点线程数 × multiplicator
    pub multiplicator: usize,
    /// 节点尚未上报系统信息时的回退大小
    pub default_size: usize,
}

impl NodeThreadsProfile {
    pub fn from_props(props: &TypedProps) -> GridResult<Self> {
        let multiplicator = read_positive(props, "multiplicator", 1)?;
        let default_size = read_positive(props, "default_size", 1)?;
        Ok(Self {
            multiplicator,
            default_size,
        })
    }
}

fn read_positive(props: &TypedProps, key: &str, default: usize) -> GridResult<usize> {
    match props.try_get_i64(key) {
        Some(Ok(v)) if v >= 1 => Ok(v as usize),
        Some(Ok(v)) => Err(GridError::Configuration(format!(
            "node_threads 的 {key} 必须不小于1: {v}"
        ))),
        Some(Err(msg)) => Err(GridError::Configuration(msg)),
        None => Ok(default),
    }
}

/// 按节点处理线程数推导任务束大小
///
/// 通道感知算法：握手上报系统信息前使用配置的回退大小。
#[derive(Debug, Clone)]
pub struct NodeThreadsBundler {
    profile: NodeThreadsProfile,
    node_threads: Option<u32>,
}

impl NodeThreadsBundler {
    pub fn new(profile: NodeThreadsProfile) -> Self {
        Self {
            profile,
            node_threads: None,
        }
    }
}

impl Bundler for NodeThreadsBundler {
    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    fn bundle_size(&self) -> usize {
        match self.node_threads {
            Some(threads) => (threads as usize * self.profile.multiplicator).max(1),
            None => self.profile.default_size,
        }
    }

    fn update_node_info(&mut self, info: &NodeSystemInfo) {
        debug!(
            "node_threads 收到节点 {} 的系统信息: {} 线程",
            info.node_uuid, info.threads
        );
        self.node_threads = Some(info.threads.max(1));
    }

    fn clone_bundler(&self) -> Box<dyn Bundler> {
        // 新通道的副本不继承旧通道的节点信息
        Box::new(Self::new(self.profile.clone()))
    }
}
