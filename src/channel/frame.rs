// Typed view of a controller feedback frame
//
// Frames arrive as positional string tokens:
// [velocity (encoder RPM), position (encoder ticks), mode, current, supply voltage,
//  supply current, motor temp, channel temp, fault flags]
// The first three are required, the rest are optional telemetry.

use std::str::FromStr;

use crate::messages::{OperatingMode, Telemetry};

/// Names of the positional fields, by token index
const FIELD_NAMES: [&str; 9] = [
    "velocity",
    "position",
    "mode",
    "motor_current",
    "supply_voltage",
    "supply_current",
    "motor_temperature",
    "channel_temperature",
    "fault_flags",
];

/// Number of tokens every frame must carry
pub const REQUIRED_FIELDS: usize = 3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame has {found} tokens, at least 3 required")]
    MissingField { found: usize },

    #[error("Field {name} (token {index}) is not valid: {token:?}")]
    InvalidField {
        index: usize,
        name: &'static str,
        token: String,
    },

    #[error("Field {name} is not finite")]
    NonFinite { name: &'static str },
}

/// Feedback frame still in encoder units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackFrame {
    pub encoder_rpm: f64,
    pub encoder_ticks: f64,
    pub mode: OperatingMode,
    pub telemetry: Telemetry,
}

fn parse_field<T: FromStr>(tokens: &[impl AsRef<str>], index: usize) -> Result<T, DecodeError> {
    let token = tokens[index].as_ref();
    token.trim().parse().map_err(|_| DecodeError::InvalidField {
        index,
        name: FIELD_NAMES[index],
        token: token.to_string(),
    })
}

fn parse_optional<T: FromStr>(
    tokens: &[impl AsRef<str>],
    index: usize,
) -> Result<Option<T>, DecodeError> {
    if index < tokens.len() {
        parse_field(tokens, index).map(Some)
    } else {
        Ok(None)
    }
}

fn finite(value: f64, index: usize) -> Result<f64, DecodeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite {
            name: FIELD_NAMES[index],
        })
    }
}

impl FeedbackFrame {
    /// Parse a whole frame; any bad token rejects the frame
    pub fn parse(tokens: &[impl AsRef<str>]) -> Result<Self, DecodeError> {
        if tokens.len() < REQUIRED_FIELDS {
            return Err(DecodeError::MissingField {
                found: tokens.len(),
            });
        }

        let encoder_rpm = finite(parse_field(tokens, 0)?, 0)?;
        let encoder_ticks = finite(parse_field(tokens, 1)?, 1)?;
        let mode = OperatingMode::from(parse_field::<u8>(tokens, 2)?);

        let telemetry = Telemetry {
            motor_current: parse_optional(tokens, 3)?,
            supply_voltage: parse_optional(tokens, 4)?,
            supply_current: parse_optional(tokens, 5)?,
            motor_temperature: parse_optional(tokens, 6)?,
            channel_temperature: parse_optional(tokens, 7)?,
            fault_flags: parse_optional(tokens, 8)?,
        };

        Ok(Self {
            encoder_rpm,
            encoder_ticks,
            mode,
            telemetry,
        })
    }
}
