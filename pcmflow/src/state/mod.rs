//! 状态管理模块
//!
//! 提供流状态机、状态事件与流配置
//!
//! # 模块结构
//!
//! - `stream_state` - 状态与错误定义
//! - `machine` - 原子状态机
//! - `transitions` - 转换通知器与事件发射
//! - `config` - 流配置

pub mod config;
mod machine;
mod stream_state;
mod transitions;

pub use config::{ConfigError, ConfigManager, ConfigResult, StreamConfig, TickMode};
pub use machine::StateMachine;
pub use stream_state::{RunningState, StreamError, StreamState};
pub use transitions::{StateEventEmitter, StateNotifier, StreamEvent};
