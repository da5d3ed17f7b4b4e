pub mod dependency;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod strategy;
pub mod test_utils;

pub use queue::{BundleReturnOutcome, ChannelDescriptor, JobQueue, JobReturn};
pub use retry::RequeuePolicy;
pub use scheduler::{JobScheduler, NodeChannel};
pub use strategy::SendResultsStrategy;
