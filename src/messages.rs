// Define message types for the runtime

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How a command setpoint is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    Stopped,
    /// Setpoint in RPM at the output shaft
    Velocity,
    /// Setpoint in revolutions at the output shaft
    Position,
}

// Command from teleop/scripts -> runtime, in user units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelCommand {
    pub channel: u8,
    pub mode: CommandMode,
    pub setpoint: f64,
}

// Command from runtime -> controller process, in encoder units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderCommand {
    pub channel: u8,
    pub mode: CommandMode,
    pub value: f64,
}

impl EncoderCommand {
    pub fn stop(channel: u8) -> Self {
        Self {
            channel,
            mode: CommandMode::Stopped,
            value: 0.0,
        }
    }
}

// Feedback frame from controller process -> runtime, already demultiplexed by channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFeedback {
    pub channel: u8,
    pub tokens: Vec<String>,
}

impl RawFeedback {
    pub fn new<I, S>(channel: u8, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel,
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

/// Operating mode byte reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OperatingMode {
    OpenLoop,
    ClosedLoopSpeed,
    ClosedLoopRelativePosition,
    ClosedLoopCountPosition,
    PositionTracking,
    Torque,
    ClosedLoopSpeedPosition,
    Other(u8),
}

impl From<u8> for OperatingMode {
    fn from(value: u8) -> Self {
        match value {
            0 => OperatingMode::OpenLoop,
            1 => OperatingMode::ClosedLoopSpeed,
            2 => OperatingMode::ClosedLoopRelativePosition,
            3 => OperatingMode::ClosedLoopCountPosition,
            4 => OperatingMode::PositionTracking,
            5 => OperatingMode::Torque,
            6 => OperatingMode::ClosedLoopSpeedPosition,
            other => OperatingMode::Other(other),
        }
    }
}

impl From<OperatingMode> for u8 {
    fn from(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::OpenLoop => 0,
            OperatingMode::ClosedLoopSpeed => 1,
            OperatingMode::ClosedLoopRelativePosition => 2,
            OperatingMode::ClosedLoopCountPosition => 3,
            OperatingMode::PositionTracking => 4,
            OperatingMode::Torque => 5,
            OperatingMode::ClosedLoopSpeedPosition => 6,
            OperatingMode::Other(other) => other,
        }
    }
}

/// Monotonic receipt time, measured from the runtime's epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp(pub Duration);

impl Stamp {
    pub const ZERO: Stamp = Stamp(Duration::ZERO);

    pub fn from_secs_f64(secs: f64) -> Self {
        Self(Duration::from_secs_f64(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Time elapsed between `epoch` and now
    pub fn since(epoch: Instant) -> Self {
        Self(epoch.elapsed())
    }
}

impl std::ops::Add<Duration> for Stamp {
    type Output = Stamp;

    fn add(self, rhs: Duration) -> Stamp {
        Stamp(self.0 + rhs)
    }
}

/// Controller telemetry, passed through exactly as reported
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Telemetry {
    pub motor_current: Option<f64>,
    pub supply_voltage: Option<f64>,
    pub supply_current: Option<f64>,
    pub motor_temperature: Option<f64>,
    pub channel_temperature: Option<f64>,
    pub fault_flags: Option<u8>,
}

// Converted feedback published by runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackReport {
    pub channel: u8,
    pub stamp: Stamp,
    pub velocity_rpm: f64,
    pub position_revs: f64,
    pub mode: OperatingMode,
    pub telemetry: Telemetry,
}

/// Watchdog state of a channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelHealth {
    Active,
    Stale,
}

/// Health status published by runtime, one per channel per tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelStatus {
    pub channel: u8,
    pub health: ChannelHealth,
    pub decode_failures: u64,
    pub rejected_commands: u64,
}

/// Raised once when a channel's feedback goes stale
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFault {
    FeedbackTimeout {
        channel: u8,
        last_feedback: Option<Stamp>,
        detected_at: Stamp,
    },
}

// Sent back to the command sender when a command is dropped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRejection {
    pub channel: u8,
    pub reason: String,
}
