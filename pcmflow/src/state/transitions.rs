//! 状态转换通知与事件发射模块
//!
//! 提供：
//! - 状态/错误变更事件
//! - 基于 channel 的事件发射器
//! - 转换成功后持有的 RAII 通知器

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::machine::{decode_state, StateMachine, DRAINING_FLAG};
use super::stream_state::{StreamError, StreamState};

/// 状态变更事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 状态变更
    StateChanged { state: StreamState },
    /// 错误变更
    ErrorChanged { error: StreamError },
}

/// 状态事件发射器
///
/// 维护监听者列表，发射时自动清理已关闭的接收器
pub struct StateEventEmitter {
    listeners: Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>,
}

impl StateEventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// 添加监听器
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// 获取当前监听器数量
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// 向所有监听者发送事件
    ///
    /// 不需要 tokio 运行时，发送失败的监听器会被移除
    pub fn emit(&self, event: StreamEvent) {
        tracing::trace!(?event, "Emitting stream event");
        self.listeners
            .lock()
            .retain(|tx| tx.send(event).is_ok());
    }
}

impl Default for StateEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// 转换通知器
///
/// 转换成功时返回，释放时依次发射 `StateChanged`（状态变化时）与
/// `ErrorChanged`（错误变化时），随后清除转换中标记。
///
/// 同一线程在发起下一次转换前必须先释放它，否则会自旋等待自己。
#[must_use = "events fire and the transition completes when the notifier is dropped"]
pub struct StateNotifier<'a> {
    machine: &'a StateMachine,
    prev_raw: u32,
    raw: u32,
    prev_error: StreamError,
    error: StreamError,
}

impl<'a> StateNotifier<'a> {
    pub(crate) fn new(
        machine: &'a StateMachine,
        prev_raw: u32,
        raw: u32,
        prev_error: StreamError,
        error: StreamError,
    ) -> Self {
        Self {
            machine,
            prev_raw,
            raw,
            prev_error,
            error,
        }
    }

    /// 转换后的状态
    pub fn state(&self) -> StreamState {
        decode_state(self.raw)
    }

    /// 转换前的状态
    pub fn prev_state(&self) -> StreamState {
        decode_state(self.prev_raw)
    }

    /// 转换后的错误
    pub fn error(&self) -> StreamError {
        self.error
    }

    pub fn is_state_changed(&self) -> bool {
        self.state() != self.prev_state()
    }

    /// 本次停止是否需要等待排空
    pub fn is_draining(&self) -> bool {
        self.raw & DRAINING_FLAG != 0
    }
}

impl Drop for StateNotifier<'_> {
    fn drop(&mut self) {
        if self.is_state_changed() {
            self.machine.emit(StreamEvent::StateChanged {
                state: self.state(),
            });
        }
        if self.prev_error != self.error {
            self.machine.emit(StreamEvent::ErrorChanged { error: self.error });
        }
        self.machine.finish_transition();
    }
}
