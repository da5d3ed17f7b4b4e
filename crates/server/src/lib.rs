pub mod channel;
pub mod client_channel;
pub mod frame;
pub mod management;
pub mod node_channel;
pub mod server;
pub mod transition;

pub use channel::{ChannelContext, ChannelState};
pub use management::GridManagement;
pub use server::GridServer;
pub use transition::TransitionExecutor;
