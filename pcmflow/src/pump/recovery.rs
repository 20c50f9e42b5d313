//! Hardware fault recovery
//!
//! Classifies a backend error and repairs the handle in place:
//!
//! | class                | first step                | fallback                   |
//! |----------------------|---------------------------|----------------------------|
//! | `Pipe`               | prepare                   | close, reopen              |
//! | `SystemSuspend`/`Io` | poll resume while EAGAIN  | prepare, then close/reopen |
//! | `WouldBlock`         | nothing                   |                            |
//! | `Unknown`            | give up                   |                            |

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::device::{ErrorClass, PcmDevice, PcmHandle};
use crate::audio::error::HwError;
use crate::pump::stream_core::HwSlot;
use crate::state::config::StreamConfig;

/// What the policy did to clear the fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing needed doing
    Ignored,
    /// Device was re-prepared
    Prepared,
    /// Device resumed from suspend
    Resumed,
    /// Handle was closed and opened again
    Reopened,
}

/// Bounded-retry recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    resume_attempts: u32,
    resume_interval: Duration,
}

impl RecoveryPolicy {
    pub fn new(resume_attempts: u32, resume_interval: Duration) -> Self {
        Self {
            resume_attempts: resume_attempts.max(1),
            resume_interval,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.resume_attempts, config.resume_interval())
    }

    /// Try to clear `err` on the handle held in `slot`
    ///
    /// `reopen` produces a fresh, prepared handle for the reset path. On
    /// failure the slot is left empty and the last error is returned; the
    /// caller is expected to stop the stream.
    pub fn recover<D, F>(
        &self,
        device: &D,
        slot: &mut Option<HwSlot<D::Handle>>,
        err: HwError,
        reopen: F,
    ) -> Result<RecoveryAction, HwError>
    where
        D: PcmDevice,
        F: FnOnce() -> Result<HwSlot<D::Handle>, HwError>,
    {
        let class = device.error_class(err);
        let Some(hw) = slot.as_mut() else {
            return Err(err);
        };

        debug!(code = err.code, ?class, "Recovering from hardware error");

        match class {
            ErrorClass::WouldBlock => return Ok(RecoveryAction::Ignored),
            ErrorClass::Unknown => {
                warn!(code = err.code, "Unrecoverable hardware error");
                *slot = None;
                return Err(err);
            }
            ErrorClass::Pipe => {
                if hw.handle.prepare().is_ok() {
                    return Ok(RecoveryAction::Prepared);
                }
            }
            ErrorClass::SystemSuspend | ErrorClass::Io => {
                let mut result = hw.handle.resume();
                let mut attempts = 1;
                while let Err(e) = result {
                    if device.error_class(e) != ErrorClass::WouldBlock
                        || attempts >= self.resume_attempts
                    {
                        break;
                    }
                    std::thread::sleep(self.resume_interval);
                    result = hw.handle.resume();
                    attempts += 1;
                }

                if result.is_ok() {
                    return Ok(RecoveryAction::Resumed);
                }
                if hw.handle.prepare().is_ok() {
                    return Ok(RecoveryAction::Prepared);
                }
            }
        }

        // Reset: the old handle must be closed before the device can be reopened
        info!(device = device.name(), "Resetting PCM device");
        *slot = None;
        let fresh = reopen()?;
        *slot = Some(fresh);
        Ok(RecoveryAction::Reopened)
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}
