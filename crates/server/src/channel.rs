use std::fmt;
use std::sync::Mutex;

use grid_core::{GridError, GridResult};
use tracing::debug;

/// 通道状态机
///
/// 节点通道沿 `Idle → SendingBundle → WaitingResult → Idle` 循环，
/// 等待结果期间节点可以发起资源请求进入
/// `SendingProviderResponse` 子循环。任何状态都能因断连进入
/// 终态 `Disconnected`，之后不再有合法转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Handshaking,
    Idle,
    SendingBundle,
    WaitingResult,
    SendingProviderResponse,
    Disconnected,
}

impl ChannelState {
    pub fn can_transition(self, to: ChannelState) -> bool {
        use ChannelState::*;
        if self == Disconnected {
            return false;
        }
        if to == Disconnected {
            return true;
        }
        matches!(
            (self, to),
            (Connecting, Handshaking)
                | (Handshaking, Idle)
                | (Idle, SendingBundle)
                | (SendingBundle, WaitingResult)
                | (WaitingResult, Idle)
                | (WaitingResult, SendingProviderResponse)
                | (SendingProviderResponse, WaitingResult)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ChannelState::Disconnected
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Handshaking => "handshaking",
            ChannelState::Idle => "idle",
            ChannelState::SendingBundle => "sending_bundle",
            ChannelState::WaitingResult => "waiting_result",
            ChannelState::SendingProviderResponse => "sending_provider_response",
            ChannelState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// 单个通道的状态上下文
///
/// 网络层与分发层在不同任务里驱动同一通道，状态由锁保护，
/// 非法转换返回错误而不是悄悄纠正。
pub struct ChannelContext {
    channel_id: u64,
    state: Mutex<ChannelState>,
}

impl ChannelContext {
    pub fn new(channel_id: u64) -> Self {
        Self {
            channel_id,
            state: Mutex::new(ChannelState::Connecting),
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().expect("通道状态锁中毒")
    }

    /// 执行一次状态转换，返回转换前的状态
    pub fn transition(&self, to: ChannelState) -> GridResult<ChannelState> {
        let mut state = self.state.lock().expect("通道状态锁中毒");
        let from = *state;
        if !from.can_transition(to) {
            return Err(GridError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        debug!("通道 {} 状态: {from} -> {to}", self.channel_id);
        *state = to;
        Ok(from)
    }

    /// 断连：从任何非终态进入 `Disconnected`
    pub fn disconnect(&self) {
        let mut state = self.state.lock().expect("通道状态锁中毒");
        if !state.is_terminal() {
            debug!("通道 {} 状态: {} -> disconnected", self.channel_id, *state);
            *state = ChannelState::Disconnected;
        }
    }
}
