//! 流配置模块
//!
//! 提供 PCM 流调优参数的定义、校验、加载与保存
//!
//! 所有时间单位为微秒，构造流时显式传入，不读取环境变量
//!
//! # 使用示例
//!
//! ```no_run
//! use pcmflow::state::config::{ConfigManager, StreamConfig};
//!
//! // 加载配置（文件不存在时返回默认值）
//! let mut config = ConfigManager::load("pcmflow.json")?;
//!
//! // 修改配置
//! config.period_time_us = 10_000;
//!
//! // 保存配置
//! ConfigManager::save("pcmflow.json", &config)?;
//! # Ok::<(), pcmflow::state::config::ConfigError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 参数不合法
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 配置结果类型
pub type ConfigResult<T> = Result<T, ConfigError>;

/// 泵的驱动方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// 启动独立的定时线程
    #[default]
    Timer,
    /// 由宿主调用 `tick()` 驱动
    Manual,
}

/// 流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 期望的硬件缓冲区时长（微秒）
    pub buffer_time_us: u64,
    /// 期望的周期时长（微秒）
    pub period_time_us: u64,
    /// 打开设备的尝试次数
    pub open_attempts: u32,
    /// resume 返回 WouldBlock 时的轮询次数
    pub resume_attempts: u32,
    /// 两次 resume 轮询之间的间隔（微秒）
    pub resume_interval_us: u64,
    /// push 写入允许的失败子写入次数
    pub push_write_retries: u32,
    /// push 子写入重试间隔（微秒）
    pub push_retry_delay_us: u64,
    /// 泵的驱动方式
    pub tick_mode: TickMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_time_us: 100_000,
            period_time_us: 20_000,
            open_attempts: 5,
            resume_attempts: 5,
            resume_interval_us: 100,
            push_write_retries: 10,
            push_retry_delay_us: 1_000,
            tick_mode: TickMode::Timer,
        }
    }
}

impl StreamConfig {
    /// 使用手动驱动的配置，测试与嵌入宿主事件循环时使用
    pub fn manual() -> Self {
        Self {
            tick_mode: TickMode::Manual,
            ..Self::default()
        }
    }

    /// 校验参数
    ///
    /// # Errors
    ///
    /// 周期或缓冲区为零、周期大于缓冲区、尝试次数为零时返回 [`ConfigError::Invalid`]
    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffer_time_us == 0 || self.period_time_us == 0 {
            return Err(ConfigError::Invalid(
                "buffer and period time must be non-zero".to_string(),
            ));
        }
        if self.period_time_us > self.buffer_time_us {
            return Err(ConfigError::Invalid(format!(
                "period time {}us exceeds buffer time {}us",
                self.period_time_us, self.buffer_time_us
            )));
        }
        if self.open_attempts == 0 || self.resume_attempts == 0 {
            return Err(ConfigError::Invalid(
                "attempt counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resume_interval(&self) -> Duration {
        Duration::from_micros(self.resume_interval_us)
    }

    pub fn push_retry_delay(&self) -> Duration {
        Duration::from_micros(self.push_retry_delay_us)
    }
}

/// 配置管理器
///
/// 以 JSON 文件形式加载和保存 [`StreamConfig`]
pub struct ConfigManager;

impl ConfigManager {
    /// 加载配置
    ///
    /// 文件不存在时返回默认配置，加载后会进行校验
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<StreamConfig> {
        let path = path.as_ref();

        tracing::debug!(path = %path.display(), "Loading stream config");

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: StreamConfig = serde_json::from_str(&content)?;
            config.validate()?;
            tracing::info!(path = %path.display(), "Stream config loaded");
            Ok(config)
        } else {
            tracing::info!("Config file not found, using defaults");
            Ok(StreamConfig::default())
        }
    }

    /// 保存配置
    pub fn save(path: impl AsRef<Path>, config: &StreamConfig) -> ConfigResult<()> {
        let path = path.as_ref();

        tracing::debug!(path = %path.display(), "Saving stream config");

        // 确保目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "Stream config saved");
        Ok(())
    }
}
