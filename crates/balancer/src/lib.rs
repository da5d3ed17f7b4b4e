pub mod bundler;
pub mod factory;
pub mod fixed;
pub mod node_threads;
pub mod proportional;
pub mod rl;

pub use bundler::{Bundler, PerformanceCache};
pub use factory::{BundlerProvider, BundlerRegistry, LoadBalancerSettings};
