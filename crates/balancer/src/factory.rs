use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use grid_core::{GridError, GridResult, TypedProps};
use tracing::{debug, info};

use crate::bundler::Bundler;
use crate::fixed::{FixedSizeBundler, FixedSizeProfile};
use crate::node_threads::{NodeThreadsBundler, NodeThreadsProfile};
use crate::proportional::{ProportionalBundler, ProportionalProfile, SharedMeans};
use crate::rl::{RlBundler, RlProfile};

/// 算法提供者：按profile参数构造算法实例
///
/// 参数解析失败返回配置错误，在通道接入或驱动启动时暴露，
/// 绝不静默回退到其它算法。
pub trait BundlerProvider: Send + Sync {
    fn algorithm_name(&self) -> &'static str;
    fn create_bundler(&self, props: &TypedProps) -> GridResult<Box<dyn Bundler>>;
}

/// 当前生效的负载均衡设置
#[derive(Debug, Clone)]
pub struct LoadBalancerSettings {
    pub algorithm: String,
    pub profile: String,
    pub properties: TypedProps,
}

/// 算法注册表
///
/// 显式生命周期的进程级对象：`init()` 注册内置算法后注入各组件，
/// 注册持写锁（罕见），创建与查询走读锁。
pub struct BundlerRegistry {
    providers: RwLock<HashMap<String, Arc<dyn BundlerProvider>>>,
    current: RwLock<LoadBalancerSettings>,
}

impl BundlerRegistry {
    pub fn new(settings: LoadBalancerSettings) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            current: RwLock::new(settings),
        }
    }

    /// 注册全部内置算法并校验当前设置
    pub fn init(&self) -> GridResult<()> {
        self.register_builtins()?;

        // 启动时即裁决算法名与profile参数，错误不留到通道接入
        let settings = self.current_settings();
        self.create_named(&settings.algorithm, &settings.properties)?;
        info!(
            "负载均衡注册表就绪，当前算法: {} (profile: {})",
            settings.algorithm, settings.profile
        );
        Ok(())
    }

    /// 仅注册内置算法，不校验当前设置
    pub fn register_builtins(&self) -> GridResult<()> {
        self.register(Arc::new(FixedSizeProvider))?;
        self.register(Arc::new(NodeThreadsProvider))?;
        self.register(Arc::new(ProportionalProvider::new()))?;
        self.register(Arc::new(RlProvider))?;
        Ok(())
    }

    pub fn register(&self, provider: Arc<dyn BundlerProvider>) -> GridResult<()> {
        let name = provider.algorithm_name().to_string();
        let mut providers = self.providers.write().expect("注册表锁中毒");
        if providers.contains_key(&name) {
            return Err(GridError::Configuration(format!(
                "负载均衡算法重复注册: {name}"
            )));
        }
        debug!("注册负载均衡算法: {name}");
        providers.insert(name, provider);
        Ok(())
    }

    pub fn algorithm_names(&self) -> Vec<String> {
        let providers = self.providers.read().expect("注册表锁中毒");
        providers.keys().cloned().collect()
    }

    /// 按当前设置创建实例（通道接入路径）
    pub fn create_bundler(&self) -> GridResult<Box<dyn Bundler>> {
        let settings = self.current_settings();
        self.create_named(&settings.algorithm, &settings.properties)
    }

    /// 按指定算法与参数创建实例
    pub fn create_named(&self, name: &str, props: &TypedProps) -> GridResult<Box<dyn Bundler>> {
        let provider = {
            let providers = self.providers.read().expect("注册表锁中毒");
            providers.get(name).cloned()
        };
        match provider {
            Some(p) => p.create_bundler(props),
            None => Err(GridError::Configuration(format!(
                "未知的负载均衡算法: {name}"
            ))),
        }
    }

    /// 运行期重配置
    ///
    /// 先用新参数试构造一个实例，成功后才替换当前设置，
    /// 失败时旧设置原样保留。
    pub fn change_settings(&self, algorithm: &str, props: TypedProps) -> GridResult<()> {
        self.create_named(algorithm, &props)?;
        let mut current = self.current.write().expect("注册表锁中毒");
        info!(
            "负载均衡设置变更: {} -> {}",
            current.algorithm, algorithm
        );
        current.algorithm = algorithm.to_string();
        current.properties = props;
        Ok(())
    }

    pub fn current_settings(&self) -> LoadBalancerSettings {
        self.current.read().expect("注册表锁中毒").clone()
    }

    /// 清空注册表，之后任何创建都会失败
    pub fn shutdown(&self) {
        self.providers.write().expect("注册表锁中毒").clear();
        info!("负载均衡注册表已关闭");
    }
}

struct FixedSizeProvider;

impl BundlerProvider for FixedSizeProvider {
    fn algorithm_name(&self) -> &'static str {
        crate::fixed::ALGORITHM
    }

    fn create_bundler(&self, props: &TypedProps) -> GridResult<Box<dyn Bundler>> {
        Ok(Box::new(FixedSizeBundler::new(FixedSizeProfile::from_props(
            props,
        )?)))
    }
}

struct NodeThreadsProvider;

impl BundlerProvider for NodeThreadsProvider {
    fn algorithm_name(&self) -> &'static str {
        crate::node_threads::ALGORITHM
    }

    fn create_bundler(&self, props: &TypedProps) -> GridResult<Box<dyn Bundler>> {
        Ok(Box::new(NodeThreadsBundler::new(
            NodeThreadsProfile::from_props(props)?,
        )))
    }
}

/// proportional 的provider持有进程级共享均值表，
/// 它产出的所有实例共享同一张表。
struct ProportionalProvider {
    shared: SharedMeans,
}

impl ProportionalProvider {
    fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl BundlerProvider for ProportionalProvider {
    fn algorithm_name(&self) -> &'static str {
        crate::proportional::ALGORITHM
    }

    fn create_bundler(&self, props: &TypedProps) -> GridResult<Box<dyn Bundler>> {
        Ok(Box::new(ProportionalBundler::new(
            ProportionalProfile::from_props(props)?,
            Arc::clone(&self.shared),
        )))
    }
}

struct RlProvider;

impl BundlerProvider for RlProvider {
    fn algorithm_name(&self) -> &'static str {
        crate::rl::ALGORITHM
    }

    fn create_bundler(&self, props: &TypedProps) -> GridResult<Box<dyn Bundler>> {
        Ok(Box::new(RlBundler::new(RlProfile::from_props(props)?)))
    }
}
