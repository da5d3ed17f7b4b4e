use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::GridResult;
use crate::models::bundle::TaskBundle;
use crate::models::job::Job;
use crate::models::node_info::NodeSystemInfo;
use crate::models::task::Task;

/// 通道线协议消息
///
/// 帧层只关心长度前缀，消息体经由本枚举的序列化编码产生，
/// 任务payload与数据提供者在其中保持不透明字节。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    // ---- 握手 ----
    /// 节点上线，上报系统信息
    NodeHandshake { system_info: NodeSystemInfo },
    /// 客户端上线
    ClientHandshake { client_uuid: String },
    /// 驱动回应握手
    HandshakeAck { driver_uuid: String },

    // ---- 客户端 → 驱动 ----
    JobSubmit { job: Job },
    CancelJob { job_uuid: String },

    // ---- 驱动 → 客户端 ----
    JobAccepted { job_uuid: String },
    JobRejected { job_uuid: String, reason: String },
    /// 部分或全部任务结果；complete 表示作业已全部解析
    TaskResults {
        job_uuid: String,
        tasks: Vec<Task>,
        complete: bool,
    },

    // ---- 驱动 → 节点 ----
    BundleDispatch { bundle: TaskBundle },
    /// 尽力而为的任务束取消信号
    CancelBundle { bundle_uuid: String },

    // ---- 节点 → 驱动 ----
    BundleResult {
        bundle_uuid: String,
        job_uuid: String,
        tasks: Vec<Task>,
    },

    // ---- 管理操作（客户端通道复用） ----
    AdminChangeLoadBalancer {
        algorithm: String,
        properties: HashMap<String, String>,
    },
    AdminQueryLoadBalancer,
    AdminLoadBalancerSettings {
        algorithm: String,
        properties: HashMap<String, String>,
    },
    AdminOk,
    AdminError { reason: String },

    // ---- 资源提供者子通道 ----
    ProviderRequest { resource: String },
    ProviderResponse {
        resource: String,
        data: Option<Vec<u8>>,
    },
}

impl WireMessage {
    /// 编码为帧payload
    pub fn encode(&self) -> GridResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 从帧payload解码
    pub fn decode(bytes: &[u8]) -> GridResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_handshake() {
        let msg = WireMessage::NodeHandshake {
            system_info: NodeSystemInfo::new("node-1", "host-a", 8),
        };
        let bytes = msg.encode().unwrap();
        match WireMessage::decode(&bytes).unwrap() {
            WireMessage::NodeHandshake { system_info } => {
                assert_eq!(system_info.node_uuid, "node-1");
                assert_eq!(system_info.threads, 8);
            }
            other => panic!("解码出意外消息: {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let result = WireMessage::decode(b"\x00\x01\x02");
        assert!(matches!(
            result,
            Err(crate::errors::GridError::Serialization(_))
        ));
    }
}
