// Timeouts, topics, channel configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Runtime loop frequency (also the watchdog check period)
pub const LOOP_HZ: u64 = 50;
pub const MAX_LOOP_HZ: u64 = 1000;

// Feedback timeout for the per-channel watchdog
pub const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_CMD: &str = "roboteq/cmd"; // user commands
pub const TOPIC_CMD_REJECTED: &str = "roboteq/cmd/rejected"; // rejections back to senders
pub const TOPIC_CONTROLLER_CMD: &str = "roboteq/controller/cmd"; // encoder-unit commands
pub const TOPIC_CONTROLLER_FEEDBACK: &str = "roboteq/controller/feedback"; // raw feedback frames
pub const TOPIC_FEEDBACK: &str = "roboteq/feedback"; // converted feedback reports
pub const TOPIC_HEALTH: &str = "roboteq/state/health"; // per-channel health
pub const TOPIC_FAULT: &str = "roboteq/state/fault"; // feedback timeouts

/// Tick period for a loop rate, clamped to 1..=MAX_LOOP_HZ so it is never zero
pub fn loop_period(hz: u64) -> Duration {
    Duration::from_micros(1_000_000 / hz.clamp(1, MAX_LOOP_HZ))
}

/// Errors that keep a channel from being brought into service
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Channel number must be at least 1")]
    InvalidChannel,

    #[error("Channel {channel}: max_rpm must be greater than zero")]
    InvalidMaxRpm { channel: u8 },

    #[error("Channel {channel}: encoder_ppr must be greater than zero")]
    InvalidEncoderPpr { channel: u8 },

    #[error("Channel {channel}: gear ratio must be finite and non-zero, got {gear_ratio}")]
    InvalidGearRatio { channel: u8, gear_ratio: f64 },

    #[error("Channel {channel}: feedback timeout must be greater than zero")]
    InvalidTimeout { channel: u8 },

    #[error("Gear ratio must be finite and non-zero, got {gear_ratio}")]
    GearRatio { gear_ratio: f64 },

    #[error("Encoder PPR must be greater than zero")]
    EncoderPpr,

    #[error("Channel {channel} is configured more than once")]
    DuplicateChannel { channel: u8 },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What a channel does besides reporting when its feedback goes stale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Only emit the fault
    #[default]
    Report,
    /// Emit the fault, forward a stop command and refuse motion commands until feedback resumes
    SafeStop,
}

/// Constants for one controller channel, fixed for the process lifetime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub channel_num: u8,
    /// Velocity limit at the output shaft (RPM)
    pub max_rpm: u32,
    pub encoder_ppr: u32,
    /// Encoder-shaft units per output-shaft unit
    pub gear_ratio: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    FEEDBACK_TIMEOUT.as_millis() as u64
}

impl ChannelConfig {
    pub fn new(channel_num: u8, max_rpm: u32, encoder_ppr: u32, gear_ratio: f64) -> Self {
        Self {
            channel_num,
            max_rpm,
            encoder_ppr,
            gear_ratio,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check every constant before a channel is built from this config
    pub fn validate(&self) -> Result<(), ConfigError> {
        let channel = self.channel_num;
        if channel == 0 {
            return Err(ConfigError::InvalidChannel);
        }
        if self.max_rpm == 0 {
            return Err(ConfigError::InvalidMaxRpm { channel });
        }
        if self.encoder_ppr == 0 {
            return Err(ConfigError::InvalidEncoderPpr { channel });
        }
        if !self.gear_ratio.is_finite() || self.gear_ratio == 0.0 {
            return Err(ConfigError::InvalidGearRatio {
                channel,
                gear_ratio: self.gear_ratio,
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout { channel });
        }
        Ok(())
    }
}

/// Everything the runtime needs to bring a controller's channels up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub stale_policy: StalePolicy,
}

impl Default for RuntimeConfig {
    // Dual-channel controller, direct drive, 500 PPR encoders
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelConfig::new(1, 3000, 500, 1.0),
                ChannelConfig::new(2, 3000, 500, 1.0),
            ],
            stale_policy: StalePolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        for channel in &config.channels {
            channel.validate()?;
        }
        Ok(config)
    }
}
