//! 流状态机
//!
//! 以一个原子状态字保存 (状态, 挂起前状态, 排空标记, 转换中标记, 错误)，
//! 所有转换都是针对允许源状态掩码的 CAS 操作。
//!
//! 竞争同一转换的多个调用方中只有一个成功；看到转换中标记的调用方让出
//! CPU 后重试，源状态不被允许或正在排空时静默失败（返回 `None`）。

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use super::stream_state::{RunningState, StreamError, StreamState};
use super::transitions::{StateEventEmitter, StateNotifier, StreamEvent};

pub(crate) const STATE_MASK: u32 = 0x0f;
pub(crate) const PREV_STATE_SHIFT: u32 = 4;
pub(crate) const DRAINING_FLAG: u32 = 1 << 8;
pub(crate) const IN_PROGRESS_FLAG: u32 = 1 << 9;
const ERROR_SHIFT: u32 = 12;
const ERROR_MASK: u32 = 0x0f << ERROR_SHIFT;

/// 从状态字中解码当前状态
pub(crate) fn decode_state(raw: u32) -> StreamState {
    StreamState::from_bits(raw & STATE_MASK)
}

fn decode_error(raw: u32) -> StreamError {
    StreamError::from_u8(((raw & ERROR_MASK) >> ERROR_SHIFT) as u8)
}

fn encode_error(error: StreamError) -> u32 {
    (error as u32) << ERROR_SHIFT & ERROR_MASK
}

fn states_mask(states: &[StreamState]) -> u32 {
    states.iter().fold(0, |mask, s| mask | s.mask_bit())
}

/// 流状态机
///
/// 状态与错误的唯一同步点，应用线程与泵线程都通过它观察和修改流状态
pub struct StateMachine {
    /// 状态字，错误与状态在同一个字里一起提交
    raw: AtomicU32,
    /// 排空等待使用的锁与条件变量
    drain_lock: Mutex<()>,
    drained: Condvar,
    /// 事件发射器
    emitter: StateEventEmitter,
}

impl StateMachine {
    /// 创建处于 Stopped/NoError 的状态机
    ///
    /// # Examples
    ///
    /// ```
    /// use pcmflow::state::{StateMachine, StreamState};
    ///
    /// let machine = StateMachine::new();
    /// assert_eq!(machine.state(), StreamState::Stopped);
    /// ```
    pub fn new() -> Self {
        Self {
            raw: AtomicU32::new(StreamState::Stopped as u32 | encode_error(StreamError::NoError)),
            drain_lock: Mutex::new(()),
            drained: Condvar::new(),
            emitter: StateEventEmitter::new(),
        }
    }

    /// 获取当前状态
    pub fn state(&self) -> StreamState {
        decode_state(self.raw.load(Ordering::Acquire))
    }

    /// 获取当前错误
    pub fn error(&self) -> StreamError {
        decode_error(self.raw.load(Ordering::Acquire))
    }

    /// 一次读取同时获得状态与错误
    pub fn snapshot(&self) -> (StreamState, StreamError) {
        let raw = self.raw.load(Ordering::Acquire);
        (decode_state(raw), decode_error(raw))
    }

    /// 是否有停止操作在等待排空
    pub fn is_draining(&self) -> bool {
        self.raw.load(Ordering::Acquire) & DRAINING_FLAG != 0
    }

    /// 是否处于 Active 或 Idle
    pub fn is_active_or_idle(&self) -> bool {
        self.state().is_running()
    }

    /// 订阅状态与错误变更事件
    ///
    /// 接收器可在同步代码中通过 `try_recv`/`blocking_recv` 读取
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.emitter.subscribe()
    }

    /// Stopped -> Active|Idle，错误复位为 NoError
    pub fn start(&self, running: RunningState) -> Option<StateNotifier<'_>> {
        let target = StreamState::from(running) as u32;
        self.change_state(&[StreamState::Stopped], |_| target, StreamError::NoError)
    }

    /// {Active, Idle, Suspended} -> Stopped
    ///
    /// `should_drain` 且之前为 Active 时，进入排空状态直到 [`on_drained`](Self::on_drained)
    /// 被调用或 [`wait_for_drained`](Self::wait_for_drained) 超时。
    /// `force_update_error` 时即使已经停止也会更新错误。
    pub fn stop(
        &self,
        error: StreamError,
        should_drain: bool,
        force_update_error: bool,
    ) -> Option<StateNotifier<'_>> {
        let notifier = self.change_state(
            &[StreamState::Active, StreamState::Idle, StreamState::Suspended],
            |prev| {
                let drain = should_drain && decode_state(prev) == StreamState::Active;
                StreamState::Stopped as u32 | if drain { DRAINING_FLAG } else { 0 }
            },
            error,
        );

        if notifier.is_none() && force_update_error {
            self.set_error(error);
        }

        notifier
    }

    /// `stop(error, false, true)` 的便捷方法
    pub fn stop_or_update_error(&self, error: StreamError) -> Option<StateNotifier<'_>> {
        self.stop(error, false, true)
    }

    /// {Active, Idle} -> Suspended，记住之前的状态，错误复位
    pub fn suspend(&self) -> Option<StateNotifier<'_>> {
        self.change_state(
            &[StreamState::Active, StreamState::Idle],
            |prev| StreamState::Suspended as u32 | (prev & STATE_MASK) << PREV_STATE_SHIFT,
            StreamError::NoError,
        )
    }

    /// Suspended -> 挂起前的状态，错误复位
    pub fn resume(&self) -> Option<StateNotifier<'_>> {
        self.change_state(
            &[StreamState::Suspended],
            |prev| (prev >> PREV_STATE_SHIFT) & STATE_MASK,
            StreamError::NoError,
        )
    }

    /// Idle -> Active
    pub fn activate_from_idle(&self) -> Option<StateNotifier<'_>> {
        self.change_state(
            &[StreamState::Idle],
            |_| StreamState::Active as u32,
            StreamError::NoError,
        )
    }

    /// {Active, Idle} -> {Active, Idle}，同时原子地更新错误
    ///
    /// 状态未变化时同样成功，只是不会发射状态事件
    pub fn update_active_or_idle(
        &self,
        running: RunningState,
        error: StreamError,
    ) -> Option<StateNotifier<'_>> {
        let target = StreamState::from(running) as u32;
        self.change_state(
            &[StreamState::Active, StreamState::Idle],
            |_| target,
            error,
        )
    }

    /// 强制设置状态与错误（跳过校验）
    ///
    /// **警告**: 会清除排空标记，仅用于初始化与测试
    pub fn force_set_state(&self, state: StreamState, error: StreamError) {
        let prev = self
            .raw
            .swap(state as u32 | encode_error(error), Ordering::AcqRel);
        let prev_error = decode_error(prev);

        if prev & DRAINING_FLAG != 0 {
            self.notify_drained();
        }
        if decode_state(prev) != state {
            self.emit(StreamEvent::StateChanged { state });
        }
        if prev_error != error {
            self.emit(StreamEvent::ErrorChanged { error });
        }
    }

    /// 独立于状态更新错误，值变化时发射 `ErrorChanged`
    pub fn set_error(&self, error: StreamError) {
        let mut current = self.raw.load(Ordering::Acquire);
        let prev = loop {
            let target = (current & !ERROR_MASK) | encode_error(error);
            match self.raw.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break decode_error(current),
                Err(actual) => current = actual,
            }
        };
        if prev != error {
            self.emit(StreamEvent::ErrorChanged { error });
        }
    }

    /// 结束排空
    ///
    /// # Returns
    ///
    /// 没有在排空时返回 `false`
    pub fn on_drained(&self) -> bool {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            if current & DRAINING_FLAG == 0 {
                return false;
            }
            match self.raw.compare_exchange_weak(
                current,
                current & !DRAINING_FLAG,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.notify_drained();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// 等待排空结束
    ///
    /// 超时后放弃排空并清除标记
    ///
    /// # Returns
    ///
    /// 在超时前完成排空（或本就没有排空）返回 `true`
    pub fn wait_for_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.drain_lock.lock();

        while self.is_draining() {
            if self.drained.wait_until(&mut guard, deadline).timed_out() {
                let prev = self.raw.fetch_and(!DRAINING_FLAG, Ordering::AcqRel);
                if prev & DRAINING_FLAG != 0 {
                    tracing::warn!(?timeout, "Drain timed out, abandoning");
                    return false;
                }
                return true;
            }
        }
        true
    }

    pub(crate) fn emit(&self, event: StreamEvent) {
        self.emitter.emit(event);
    }

    /// 通知器释放时清除转换中标记
    pub(crate) fn finish_transition(&self) {
        self.raw.fetch_and(!IN_PROGRESS_FLAG, Ordering::AcqRel);
    }

    fn notify_drained(&self) {
        let _guard = self.drain_lock.lock();
        self.drained.notify_all();
    }

    fn change_state<F>(
        &self,
        allowed: &[StreamState],
        next: F,
        error: StreamError,
    ) -> Option<StateNotifier<'_>>
    where
        F: Fn(u32) -> u32,
    {
        let allowed = states_mask(allowed);
        let mut current = self.raw.load(Ordering::Acquire);

        loop {
            if current & IN_PROGRESS_FLAG != 0 {
                // 另一个转换尚未发射事件，等待其完成后重新判断
                std::thread::yield_now();
                current = self.raw.load(Ordering::Acquire);
                continue;
            }

            if current & DRAINING_FLAG != 0 || allowed & decode_state(current).mask_bit() == 0 {
                return None;
            }

            let target = next(current) | encode_error(error);
            match self.raw.compare_exchange_weak(
                current,
                target | IN_PROGRESS_FLAG,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let prev_error = decode_error(current);
                    return Some(StateNotifier::new(self, current, target, prev_error, error));
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state())
            .field("error", &self.error())
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_start_sets_running_state_and_clears_error() {
        let machine = StateMachine::new();
        machine.set_error(StreamError::IoError);
        let mut rx = machine.subscribe();

        let notifier = machine.start(RunningState::Idle).unwrap();
        assert_eq!(notifier.prev_state(), StreamState::Stopped);
        assert_eq!(notifier.state(), StreamState::Idle);
        assert!(drain_events(&mut rx).is_empty(), "events fire on drop only");
        drop(notifier);

        assert_eq!(machine.state(), StreamState::Idle);
        assert_eq!(machine.error(), StreamError::NoError);
        assert_eq!(
            drain_events(&mut rx),
            vec![
                StreamEvent::StateChanged { state: StreamState::Idle },
                StreamEvent::ErrorChanged { error: StreamError::NoError },
            ]
        );
    }

    #[test]
    fn test_suspend_records_previous_state() {
        let machine = StateMachine::new();
        machine.force_set_state(StreamState::Idle, StreamError::UnderrunError);

        drop(machine.suspend().unwrap());
        assert_eq!(machine.state(), StreamState::Suspended);
        assert_eq!(machine.error(), StreamError::NoError);

        let notifier = machine.resume().unwrap();
        assert_eq!(notifier.state(), StreamState::Idle);
        drop(notifier);
        assert_eq!(machine.state(), StreamState::Idle);
    }

    #[test]
    fn test_stop_with_drain_only_from_active() {
        let machine = StateMachine::new();

        machine.force_set_state(StreamState::Idle, StreamError::NoError);
        let notifier = machine.stop(StreamError::NoError, true, false).unwrap();
        assert!(!notifier.is_draining());
        drop(notifier);
        assert!(!machine.is_draining());

        machine.force_set_state(StreamState::Active, StreamError::NoError);
        let notifier = machine.stop(StreamError::NoError, true, false).unwrap();
        assert!(notifier.is_draining());
        drop(notifier);
        assert!(machine.is_draining());
        assert_eq!(machine.state(), StreamState::Stopped);

        assert!(machine.on_drained());
        assert!(!machine.is_draining());
        assert!(!machine.on_drained());
    }

    #[test]
    fn test_wait_for_drained_times_out_and_clears() {
        let machine = StateMachine::new();
        machine.force_set_state(StreamState::Active, StreamError::NoError);
        drop(machine.stop(StreamError::NoError, true, false));

        assert!(!machine.wait_for_drained(Duration::from_millis(10)));
        assert!(!machine.is_draining());
        assert!(machine.start(RunningState::Active).is_some());
    }

    #[test]
    fn test_wait_for_drained_wakes_on_drained() {
        let machine = std::sync::Arc::new(StateMachine::new());
        machine.force_set_state(StreamState::Active, StreamError::NoError);
        drop(machine.stop(StreamError::NoError, true, false));

        let waiter = {
            let machine = std::sync::Arc::clone(&machine);
            std::thread::spawn(move || machine.wait_for_drained(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(machine.on_drained());
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_force_set_state_emits_changes() {
        let machine = StateMachine::new();
        let mut rx = machine.subscribe();

        machine.force_set_state(StreamState::Suspended, StreamError::FatalError);
        assert_eq!(
            drain_events(&mut rx),
            vec![
                StreamEvent::StateChanged { state: StreamState::Suspended },
                StreamEvent::ErrorChanged { error: StreamError::FatalError },
            ]
        );

        machine.force_set_state(StreamState::Suspended, StreamError::FatalError);
        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn test_error_commits_with_state() {
        let machine = std::sync::Arc::new(StateMachine::new());
        drop(machine.start(RunningState::Active));
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let machine = std::sync::Arc::clone(&machine);
            let done = std::sync::Arc::clone(&done);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    drop(machine.update_active_or_idle(RunningState::Idle, StreamError::UnderrunError));
                    drop(machine.update_active_or_idle(RunningState::Active, StreamError::NoError));
                }
                done.store(true, Ordering::Release);
            })
        };

        while !done.load(Ordering::Acquire) {
            match machine.snapshot() {
                (StreamState::Idle, StreamError::UnderrunError)
                | (StreamState::Active, StreamError::NoError) => {}
                other => panic!("torn state/error pair {:?}", other),
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_set_error_keeps_state_bits() {
        let machine = StateMachine::new();
        machine.force_set_state(StreamState::Suspended, StreamError::NoError);

        machine.set_error(StreamError::IoError);
        assert_eq!(machine.snapshot(), (StreamState::Suspended, StreamError::IoError));

        // 挂起前状态仍然保留
        machine.force_set_state(StreamState::Active, StreamError::NoError);
        drop(machine.suspend());
        machine.set_error(StreamError::UnderrunError);
        drop(machine.resume());
        assert_eq!(machine.snapshot(), (StreamState::Active, StreamError::NoError));
    }

    #[test]
    fn test_debug_output() {
        let machine = StateMachine::new();
        let dbg = format!("{:?}", machine);
        assert!(dbg.contains("Stopped"));
        assert!(dbg.contains("NoError"));
    }
}
