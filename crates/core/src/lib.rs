pub mod config;
pub mod errors;
pub mod models;
pub mod props;
pub mod stats;

pub use errors::{GridError, GridResult};
pub use props::TypedProps;
