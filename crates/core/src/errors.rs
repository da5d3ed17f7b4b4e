use thiserror::Error;

/// 网格驱动错误类型定义
#[derive(Debug, Error)]
pub enum GridError {
    #[error("无效的作业: {0}")]
    InvalidJob(String),

    #[error("作业未找到: {uuid}")]
    JobNotFound { uuid: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("检测到循环依赖")]
    CircularDependency,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("通道已关闭: {0}")]
    ChannelClosed(String),

    #[error("非法的状态转换: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

/// 统一的Result类型
pub type GridResult<T> = std::result::Result<T, GridError>;

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::Network(err.to_string())
    }
}
