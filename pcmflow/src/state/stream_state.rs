use serde::{Deserialize, Serialize};

/// 流状态
///
/// `Suspended` 会记住进入前的状态，`resume` 时原样恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamState {
    /// 已停止，未持有硬件句柄
    #[default]
    Stopped = 0,

    /// 正在传输数据
    Active = 1,

    /// 已启动但当前没有数据流动
    Idle = 2,

    /// 被应用挂起
    Suspended = 3,
}

impl StreamState {
    /// 从状态字的低位解码
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::Active,
            2 => Self::Idle,
            3 => Self::Suspended,
            _ => Self::Stopped,
        }
    }

    /// 该状态在允许源状态掩码中的位
    pub(crate) fn mask_bit(self) -> u32 {
        1 << self as u32
    }

    /// 检查是否为停止状态
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// 检查是否为运行状态（Active 或 Idle）
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Active | Self::Idle)
    }

    /// 获取状态名称（用于日志和调试）
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Active => "Active",
            Self::Idle => "Idle",
            Self::Suspended => "Suspended",
        }
    }
}

/// 运行子状态，`start` 与 `update_active_or_idle` 的目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunningState {
    #[default]
    Active,
    Idle,
}

impl From<RunningState> for StreamState {
    fn from(state: RunningState) -> Self {
        match state {
            RunningState::Active => Self::Active,
            RunningState::Idle => Self::Idle,
        }
    }
}

/// 流错误
///
/// 与状态相互独立，`start`/`suspend`/`resume` 会将其复位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamError {
    /// 无错误
    #[default]
    NoError = 0,

    /// 打开设备失败或格式不合法
    OpenError = 1,

    /// 客户端或硬件读写失败
    IoError = 2,

    /// 数据供应不足
    UnderrunError = 3,

    /// 不可恢复的错误，流已被强制停止
    FatalError = 4,
}

impl StreamError {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::OpenError,
            2 => Self::IoError,
            3 => Self::UnderrunError,
            4 => Self::FatalError,
            _ => Self::NoError,
        }
    }

    /// 获取错误名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoError => "NoError",
            Self::OpenError => "OpenError",
            Self::IoError => "IOError",
            Self::UnderrunError => "UnderrunError",
            Self::FatalError => "FatalError",
        }
    }
}
