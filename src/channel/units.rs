// Conversions between output-shaft units (RPM, revolutions) and encoder units
// (encoder RPM, quadrature ticks).

use crate::config::{ChannelConfig, ConfigError};

/// Quadrature decoding counts every edge of both encoder lines
pub const TICKS_PER_PULSE: f64 = 4.0;

/// Pure unit math for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConverter {
    gear_ratio: f64,
    encoder_ppr: u32,
}

impl UnitConverter {
    /// Create a converter, refusing constants that would divide by zero
    pub fn new(gear_ratio: f64, encoder_ppr: u32) -> Result<Self, ConfigError> {
        if !gear_ratio.is_finite() || gear_ratio == 0.0 {
            return Err(ConfigError::GearRatio { gear_ratio });
        }
        if encoder_ppr == 0 {
            return Err(ConfigError::EncoderPpr);
        }
        Ok(Self {
            gear_ratio,
            encoder_ppr,
        })
    }

    /// Validate the whole channel config, so errors name the channel
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(config.gear_ratio, config.encoder_ppr)
    }

    pub fn gear_ratio(&self) -> f64 {
        self.gear_ratio
    }

    pub fn encoder_ppr(&self) -> u32 {
        self.encoder_ppr
    }

    fn ticks_per_rev(&self) -> f64 {
        self.gear_ratio * self.encoder_ppr as f64 * TICKS_PER_PULSE
    }

    /// Output-shaft RPM to encoder-shaft RPM
    pub fn to_encoder_rpm(&self, rpm: f64) -> f64 {
        rpm * self.gear_ratio
    }

    /// Encoder-shaft RPM to output-shaft RPM
    pub fn from_encoder_rpm(&self, encoder_rpm: f64) -> f64 {
        encoder_rpm / self.gear_ratio
    }

    /// Output-shaft revolutions to encoder ticks
    pub fn to_encoder_ticks(&self, revs: f64) -> f64 {
        revs * self.ticks_per_rev()
    }

    /// Encoder ticks to output-shaft revolutions
    pub fn from_encoder_ticks(&self, ticks: f64) -> f64 {
        ticks / self.ticks_per_rev()
    }
}
