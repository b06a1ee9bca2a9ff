//! Engine configuration.
//!
//! `EngineConfig` controls how a [`TouchEngine`](crate::engine::TouchEngine)
//! drives its external engine instance: which clock the frames are timed
//! with, how long a cook may take, and how the texture pipeline behaves.
//!
//! `EngineConfig` provides sensible defaults via [`Default`] and a fluent
//! [`EngineConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use touch_engine::config::{EngineConfig, TimeMode};
//! let cfg = EngineConfig::default();
//! assert_eq!(cfg.time_mode, TimeMode::Internal);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use touch_engine::config::{EngineConfig, TimeMode};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = EngineConfig::builder()
//!     .time_mode(TimeMode::External)
//!     .frame_rate(30)
//!     .cook_timeout(Duration::from_secs(2))
//!     .build()?; // returns Result<EngineConfig, EngineConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `time_mode`: Internal (engine clock) or external (host supplied time). Fixed per instance.
//! - `frame_rate`: Frame rate the instance is configured with (default: 60).
//! - `cook_timeout`: Maximum time a cook may stay in flight before it is cancelled.
//! - `input_buffer_limit`: Maximum number of frames the engine may buffer inputs for.
//! - `render_thread_name`: Name of the thread all GPU work is funneled onto.
//! - `import_texture_outputs`: Import texture outputs automatically when the engine
//!   reports a value change.
//! - `log_level`: When set, an `env_logger` logger is installed with this level.
//!
//! # Errors
//!
//! Builder validation can return [`EngineConfigError`] if values are invalid
//! (e.g. `frame_rate == 0`, a zero `cook_timeout` or an empty `render_thread_name`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Clock used to time frames. Chosen once per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeMode {
    /// The engine keeps its own clock. Frame start calls pass a zero time.
    Internal,
    /// The host supplies the time; elapsed frame times are accumulated.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub time_mode: TimeMode,
    pub frame_rate: u32,
    #[serde(with = "duration_millis")]
    pub cook_timeout: Duration,
    pub input_buffer_limit: u32,
    pub render_thread_name: String,
    pub import_texture_outputs: bool,
    pub log_level: Option<LogLevel>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_mode: TimeMode::Internal,
            frame_rate: 60,
            cook_timeout: Duration::from_secs(5),
            input_buffer_limit: 0,
            render_thread_name: "touch-render".to_string(),
            import_texture_outputs: true,
            log_level: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Ticks per second used for frame times.
    pub fn time_scale(&self) -> i64 {
        i64::from(self.frame_rate) * 1000
    }

    /// Install an `env_logger` logger when a level is configured. Safe to call more than once.
    pub fn init_logging(&self) {
        if let Some(level) = self.log_level {
            let _ = env_logger::Builder::new()
                .filter_level(level.into())
                .try_init();
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl EngineConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn time_mode(self, mode: TimeMode) -> Self { self.map(|c| c.time_mode = mode) }
    pub fn frame_rate(self, fps: u32) -> Self { self.map(|c| c.frame_rate = fps) }
    pub fn cook_timeout(self, timeout: Duration) -> Self { self.map(|c| c.cook_timeout = timeout) }
    pub fn input_buffer_limit(self, frames: u32) -> Self { self.map(|c| c.input_buffer_limit = frames) }
    pub fn render_thread_name(self, name: impl Into<String>) -> Self { self.map(|c| c.render_thread_name = name.into()) }
    pub fn import_texture_outputs(self, on: bool) -> Self { self.map(|c| c.import_texture_outputs = on) }
    pub fn log_level(self, level: LogLevel) -> Self { self.map(|c| c.log_level = Some(level)) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut EngineConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<EngineConfig, EngineConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum EngineConfigError {
    InvalidFrameRate(u32),
    InvalidCookTimeout(Duration),
    EmptyRenderThreadName,
}

impl fmt::Display for EngineConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineConfigError::InvalidFrameRate(v) => write!(f, "frame_rate must be > 0 (got {v})"),
            EngineConfigError::InvalidCookTimeout(v) => write!(f, "cook_timeout must be > 0 (got {v:?})"),
            EngineConfigError::EmptyRenderThreadName => write!(f, "render_thread_name must not be empty"),
        }
    }
}

impl std::error::Error for EngineConfigError {}

pub fn validate(cfg: &EngineConfig) -> Result<(), EngineConfigError> {
    if cfg.frame_rate == 0 {
        return Err(EngineConfigError::InvalidFrameRate(cfg.frame_rate));
    }
    if cfg.cook_timeout.is_zero() {
        return Err(EngineConfigError::InvalidCookTimeout(cfg.cook_timeout));
    }
    if cfg.render_thread_name.trim().is_empty() {
        return Err(EngineConfigError::EmptyRenderThreadName);
    }
    Ok(())
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
