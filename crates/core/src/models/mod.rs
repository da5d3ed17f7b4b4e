pub mod bundle;
pub mod job;
pub mod message;
pub mod node_info;
pub mod policy;
pub mod task;

pub use bundle::TaskBundle;
pub use job::{Job, JobSla};
pub use message::WireMessage;
pub use node_info::NodeSystemInfo;
pub use policy::ExecutionPolicy;
pub use task::{FailureKind, Task, TaskFailure, TaskOutcome};
