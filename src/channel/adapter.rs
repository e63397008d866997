// One controller channel (axis): command intake, feedback decode, watchdog
//
// All three entry points take `&self` and run to completion; the watchdog and the
// last observed mode live behind one lock so a check never sees a half-applied frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::frame::{DecodeError, FeedbackFrame};
use super::io::CommandSink;
use super::units::UnitConverter;
use super::watchdog::{Transition, Watchdog};
use crate::config::{ChannelConfig, ConfigError, StalePolicy};
use crate::messages::{
    ChannelCommand, ChannelFault, ChannelHealth, ChannelStatus, CommandMode, EncoderCommand,
    FeedbackReport, OperatingMode, Stamp,
};

/// Reasons a command is dropped at the channel boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Command for channel {got} sent to channel {expected}")]
    WrongChannel { expected: u8, got: u8 },

    #[error("Setpoint is not finite")]
    NonFinite,

    #[error("Velocity {rpm} RPM exceeds limit of {max_rpm} RPM")]
    ExceedsMaxRpm { rpm: f64, max_rpm: u32 },

    #[error("Feedback is stale, refusing motion command")]
    FeedbackStale,
}

/// State written by the feedback path and read by the watchdog check
#[derive(Debug)]
struct FeedbackState {
    watchdog: Watchdog,
    last_mode: Option<OperatingMode>,
}

pub struct Channel<K> {
    config: ChannelConfig,
    converter: UnitConverter,
    policy: StalePolicy,
    sink: K,
    state: Mutex<FeedbackState>,
    decode_failures: AtomicU64,
    rejected_commands: AtomicU64,
}

impl<K: CommandSink> Channel<K> {
    /// Build a channel; invalid constants keep it out of service
    pub fn new(config: ChannelConfig, sink: K) -> Result<Self, ConfigError> {
        Self::with_policy(config, StalePolicy::default(), sink)
    }

    pub fn with_policy(
        config: ChannelConfig,
        policy: StalePolicy,
        sink: K,
    ) -> Result<Self, ConfigError> {
        let converter = UnitConverter::from_config(&config)?;
        info!(
            "Channel {} ready: gear ratio {}, {} PPR, max {} RPM, {}ms feedback timeout",
            config.channel_num,
            config.gear_ratio,
            config.encoder_ppr,
            config.max_rpm,
            config.timeout_ms
        );
        Ok(Self {
            state: Mutex::new(FeedbackState {
                watchdog: Watchdog::new(config.timeout()),
                last_mode: None,
            }),
            config,
            converter,
            policy,
            sink,
            decode_failures: AtomicU64::new(0),
            rejected_commands: AtomicU64::new(0),
        })
    }

    pub fn channel_num(&self) -> u8 {
        self.config.channel_num
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    fn state(&self) -> MutexGuard<'_, FeedbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn health(&self) -> ChannelHealth {
        self.state().watchdog.health()
    }

    pub fn last_feedback_time(&self) -> Option<Stamp> {
        self.state().watchdog.last_feed()
    }

    pub fn last_mode(&self) -> Option<OperatingMode> {
        self.state().last_mode
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn rejected_commands(&self) -> u64 {
        self.rejected_commands.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            channel: self.channel_num(),
            health: self.health(),
            decode_failures: self.decode_failures(),
            rejected_commands: self.rejected_commands(),
        }
    }

    /// Convert a user-unit command and forward it to the controller
    ///
    /// The stale check and the send happen under the state lock, so a motion
    /// command can never reach the sink after the watchdog's safe stop.
    pub fn on_command(&self, cmd: &ChannelCommand) -> Result<EncoderCommand, CommandError> {
        let state = self.state();
        let result = self.convert_command(cmd, &state);
        match result {
            Ok(encoder_cmd) => {
                debug!(
                    "Channel {}: {:?} {} -> {}",
                    self.channel_num(),
                    cmd.mode,
                    cmd.setpoint,
                    encoder_cmd.value
                );
                self.sink.send_command(encoder_cmd.clone());
                Ok(encoder_cmd)
            }
            Err(e) => {
                drop(state);
                self.rejected_commands.fetch_add(1, Ordering::Relaxed);
                warn!("Channel {}: rejected command: {}", self.channel_num(), e);
                Err(e)
            }
        }
    }

    fn convert_command(
        &self,
        cmd: &ChannelCommand,
        state: &FeedbackState,
    ) -> Result<EncoderCommand, CommandError> {
        let channel = self.channel_num();
        if cmd.channel != channel {
            return Err(CommandError::WrongChannel {
                expected: channel,
                got: cmd.channel,
            });
        }
        if cmd.mode == CommandMode::Stopped {
            return Ok(EncoderCommand::stop(channel));
        }
        if !cmd.setpoint.is_finite() {
            return Err(CommandError::NonFinite);
        }
        if self.policy == StalePolicy::SafeStop && state.watchdog.health() == ChannelHealth::Stale
        {
            return Err(CommandError::FeedbackStale);
        }

        let value = match cmd.mode {
            CommandMode::Velocity => {
                if cmd.setpoint.abs() > self.config.max_rpm as f64 {
                    return Err(CommandError::ExceedsMaxRpm {
                        rpm: cmd.setpoint,
                        max_rpm: self.config.max_rpm,
                    });
                }
                self.converter.to_encoder_rpm(cmd.setpoint)
            }
            CommandMode::Position => self.converter.to_encoder_ticks(cmd.setpoint),
            CommandMode::Stopped => 0.0,
        };

        if let Some(mode) = state.last_mode {
            debug!("Channel {}: controller last reported mode {:?}", channel, mode);
        }

        Ok(EncoderCommand {
            channel,
            mode: cmd.mode,
            value,
        })
    }

    /// Decode a feedback frame received at `now`
    ///
    /// A frame that fails to decode is dropped whole: nothing is published and
    /// the watchdog is not fed.
    pub fn on_feedback(
        &self,
        tokens: &[impl AsRef<str>],
        now: Stamp,
    ) -> Result<FeedbackReport, DecodeError> {
        let frame = match FeedbackFrame::parse(tokens) {
            Ok(frame) => frame,
            Err(e) => {
                let failures = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Channel {}: dropping feedback frame ({} failures): {}",
                    self.channel_num(),
                    failures,
                    e
                );
                return Err(e);
            }
        };

        let report = FeedbackReport {
            channel: self.channel_num(),
            stamp: now,
            velocity_rpm: self.converter.from_encoder_rpm(frame.encoder_rpm),
            position_revs: self.converter.from_encoder_ticks(frame.encoder_ticks),
            mode: frame.mode,
            telemetry: frame.telemetry,
        };

        let transition = {
            let mut state = self.state();
            state.last_mode = Some(frame.mode);
            state.watchdog.feed(now)
        };
        if transition == Some(Transition::Recovered) {
            info!("Channel {}: feedback active", self.channel_num());
        }

        Ok(report)
    }

    /// Periodic watchdog check; returns a fault on the Active -> Stale edge
    pub fn check_timeout(&self, now: Stamp) -> Option<ChannelFault> {
        let last_feedback = {
            let mut state = self.state();
            if state.watchdog.check(now) != Some(Transition::TimedOut) {
                return None;
            }
            // Sent under the lock so it is ordered after any command already accepted
            if self.policy == StalePolicy::SafeStop {
                self.sink.send_command(EncoderCommand::stop(self.channel_num()));
            }
            state.watchdog.last_feed()
        };

        warn!(
            "Channel {}: no feedback for more than {:?}, marking stale",
            self.channel_num(),
            self.timeout()
        );

        Some(ChannelFault::FeedbackTimeout {
            channel: self.channel_num(),
            last_feedback,
            detected_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::io::RecordingSink;

    const T: Duration = Duration::from_secs(1);
    const EPS: Duration = Duration::from_millis(1);

    fn channel(sink: RecordingSink) -> Channel<RecordingSink> {
        Channel::new(ChannelConfig::new(1, 100, 500, 19.0).with_timeout(T), sink).unwrap()
    }

    fn velocity(setpoint: f64) -> ChannelCommand {
        ChannelCommand {
            channel: 1,
            mode: CommandMode::Velocity,
            setpoint,
        }
    }

    #[test]
    fn test_end_to_end_feedback() {
        let ch = channel(RecordingSink::new());
        let report = ch.on_feedback(&["1900", "0", "1"], Stamp::ZERO).unwrap();

        assert_eq!(report.channel, 1);
        assert_eq!(report.velocity_rpm, 100.0);
        assert_eq!(report.position_revs, 0.0);
        assert_eq!(report.mode, OperatingMode::ClosedLoopSpeed);
        assert_eq!(u8::from(report.mode), 1);
        assert_eq!(report.stamp, Stamp::ZERO);

        assert_eq!(ch.health(), ChannelHealth::Active);
        assert_eq!(ch.check_timeout(Stamp::ZERO + (T - EPS)), None);
        assert_eq!(ch.health(), ChannelHealth::Active);
        assert!(ch.check_timeout(Stamp::ZERO + (T + EPS)).is_some());
        assert_eq!(ch.health(), ChannelHealth::Stale);
    }

    #[test]
    fn test_position_feedback_conversion() {
        let ch = channel(RecordingSink::new());
        // One output revolution is 19 * 500 * 4 ticks
        let report = ch
            .on_feedback(&["0", "76000", "3", "12", "240"], Stamp::ZERO)
            .unwrap();
        assert_eq!(report.position_revs, 2.0);
        assert_eq!(report.telemetry.motor_current, Some(12.0));
        assert_eq!(report.telemetry.supply_voltage, Some(240.0));
        assert_eq!(ch.last_mode(), Some(OperatingMode::ClosedLoopCountPosition));
    }

    #[test]
    fn test_fresh_channel_is_stale() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        assert_eq!(ch.health(), ChannelHealth::Stale);
        // Stays stale after a full period, with no edge to report
        assert_eq!(ch.check_timeout(Stamp::ZERO + T + EPS), None);
        assert_eq!(ch.health(), ChannelHealth::Stale);
        assert_eq!(ch.last_feedback_time(), None);
        assert!(sink.commands().is_empty());
    }

    #[test]
    fn test_recovery_stamps_receipt_time() {
        let ch = channel(RecordingSink::new());
        ch.on_feedback(&["0", "0", "1"], Stamp::ZERO).unwrap();
        ch.check_timeout(Stamp::from_secs_f64(5.0)).unwrap();
        assert_eq!(ch.health(), ChannelHealth::Stale);

        let t1 = Stamp::from_secs_f64(6.0);
        ch.on_feedback(&["0", "0", "1"], t1).unwrap();
        assert_eq!(ch.health(), ChannelHealth::Active);
        assert_eq!(ch.last_feedback_time(), Some(t1));
    }

    #[test]
    fn test_bad_frame_is_dropped() {
        let ch = channel(RecordingSink::new());
        let t0 = Stamp::from_millis(100);
        ch.on_feedback(&["1900", "0", "1"], t0).unwrap();

        let err = ch
            .on_feedback(&["1900", "oops", "1"], Stamp::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { index: 1, .. }));
        assert_eq!(ch.last_feedback_time(), Some(t0));
        assert_eq!(ch.decode_failures(), 1);

        // Partially valid frames do not feed the watchdog either
        assert!(ch.on_feedback(&["1900", "0", "mode"], Stamp::from_millis(900)).is_err());
        assert_eq!(ch.last_mode(), Some(OperatingMode::ClosedLoopSpeed));
        assert!(ch.check_timeout(t0 + T + EPS).is_some());
        assert_eq!(ch.decode_failures(), 2);
    }

    #[test]
    fn test_bad_frame_on_fresh_channel() {
        let ch = channel(RecordingSink::new());
        assert!(ch.on_feedback(&["x", "0", "1"], Stamp::ZERO).is_err());
        assert_eq!(ch.health(), ChannelHealth::Stale);
        assert_eq!(ch.last_feedback_time(), None);
        assert_eq!(ch.last_mode(), None);
    }

    #[test]
    fn test_velocity_command_forwarded() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        let cmd = ch.on_command(&velocity(-50.0)).unwrap();
        assert_eq!(cmd.value, -950.0);
        assert_eq!(
            sink.commands(),
            vec![EncoderCommand {
                channel: 1,
                mode: CommandMode::Velocity,
                value: -950.0,
            }]
        );
    }

    #[test]
    fn test_position_command_forwarded() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        let cmd = ch
            .on_command(&ChannelCommand {
                channel: 1,
                mode: CommandMode::Position,
                setpoint: 0.5,
            })
            .unwrap();
        assert_eq!(cmd.mode, CommandMode::Position);
        assert_eq!(cmd.value, 19000.0);
        assert_eq!(sink.commands().len(), 1);
    }

    #[test]
    fn test_stop_command_ignores_setpoint() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        ch.on_command(&ChannelCommand {
            channel: 1,
            mode: CommandMode::Stopped,
            setpoint: f64::NAN,
        })
        .unwrap();
        assert_eq!(sink.commands(), vec![EncoderCommand::stop(1)]);
    }

    #[test]
    fn test_over_limit_command_rejected() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        assert!(matches!(
            ch.on_command(&velocity(100.5)),
            Err(CommandError::ExceedsMaxRpm { max_rpm: 100, .. })
        ));
        assert!(matches!(
            ch.on_command(&velocity(-101.0)),
            Err(CommandError::ExceedsMaxRpm { .. })
        ));
        // Exactly at the limit is allowed
        assert!(ch.on_command(&velocity(100.0)).is_ok());

        assert_eq!(sink.commands().len(), 1);
        assert_eq!(ch.rejected_commands(), 2);
    }

    #[test]
    fn test_malformed_commands_rejected() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        assert_eq!(
            ch.on_command(&velocity(f64::INFINITY)),
            Err(CommandError::NonFinite)
        );
        assert_eq!(
            ch.on_command(&ChannelCommand {
                channel: 2,
                mode: CommandMode::Velocity,
                setpoint: 1.0,
            }),
            Err(CommandError::WrongChannel {
                expected: 1,
                got: 2
            })
        );
        assert!(sink.commands().is_empty());
    }

    #[test]
    fn test_report_policy_keeps_forwarding() {
        let sink = RecordingSink::new();
        let ch = channel(sink.clone());
        // Stale from the start, commands still pass under the default policy
        assert!(ch.on_command(&velocity(10.0)).is_ok());
        ch.on_feedback(&["0", "0", "1"], Stamp::ZERO).unwrap();
        assert!(ch.check_timeout(Stamp::ZERO + T * 2).is_some());
        assert_eq!(sink.commands().len(), 1);
    }

    #[test]
    fn test_safe_stop_policy() {
        let sink = RecordingSink::new();
        let ch = Channel::with_policy(
            ChannelConfig::new(1, 100, 500, 19.0).with_timeout(T),
            StalePolicy::SafeStop,
            sink.clone(),
        )
        .unwrap();

        assert_eq!(ch.on_command(&velocity(10.0)), Err(CommandError::FeedbackStale));

        ch.on_feedback(&["0", "0", "1"], Stamp::ZERO).unwrap();
        assert!(ch.on_command(&velocity(10.0)).is_ok());
        sink.take();

        let fault = ch.check_timeout(Stamp::ZERO + T + EPS).unwrap();
        assert_eq!(
            fault,
            ChannelFault::FeedbackTimeout {
                channel: 1,
                last_feedback: Some(Stamp::ZERO),
                detected_at: Stamp::ZERO + T + EPS,
            }
        );
        assert_eq!(sink.take(), vec![EncoderCommand::stop(1)]);

        // Stop still goes through while stale
        assert!(ch
            .on_command(&ChannelCommand {
                channel: 1,
                mode: CommandMode::Stopped,
                setpoint: 0.0,
            })
            .is_ok());
        assert_eq!(ch.on_command(&velocity(10.0)), Err(CommandError::FeedbackStale));
    }

    #[test]
    fn test_status() {
        let ch = channel(RecordingSink::new());
        let _ = ch.on_feedback(&["bad"], Stamp::ZERO);
        let _ = ch.on_command(&velocity(1000.0));
        let status = ch.status();
        assert_eq!(status.channel, 1);
        assert_eq!(status.health, ChannelHealth::Stale);
        assert_eq!(status.decode_failures, 1);
        assert_eq!(status.rejected_commands, 1);
    }

    #[test]
    fn test_invalid_config_not_built() {
        assert!(Channel::new(ChannelConfig::new(1, 100, 500, 0.0), RecordingSink::new()).is_err());
        assert!(Channel::new(ChannelConfig::new(0, 100, 500, 1.0), RecordingSink::new()).is_err());
    }

    #[test]
    fn test_concurrent_feedback_and_watchdog() {
        use std::sync::Arc;
        use std::thread;

        let timeout = Duration::from_millis(10);
        let ch = Arc::new(
            Channel::new(
                ChannelConfig::new(1, 100, 500, 19.0).with_timeout(timeout),
                RecordingSink::new(),
            )
            .unwrap(),
        );
        let feeder = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    ch.on_feedback(&["1900", "0", "1"], Stamp::from_millis(i))
                        .unwrap();
                }
            })
        };
        let checker = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                // Runs ahead of the feeder, so the deadline is crossed repeatedly
                (0..1000u64)
                    .filter_map(|i| ch.check_timeout(Stamp::from_millis(i * 2)))
                    .collect::<Vec<_>>()
            })
        };
        feeder.join().unwrap();
        let faults = checker.join().unwrap();

        // Every fault saw a consistent feed time strictly past its deadline
        for fault in &faults {
            let ChannelFault::FeedbackTimeout {
                last_feedback,
                detected_at,
                ..
            } = fault;
            let last = last_feedback.expect("only an active channel can time out");
            assert!(last + timeout < *detected_at, "torn read: {:?}", fault);
        }

        let last = Stamp::from_millis(999);
        assert_eq!(ch.last_feedback_time(), Some(last));
        match ch.health() {
            ChannelHealth::Active => {
                assert_eq!(ch.check_timeout(last + timeout), None);
                assert!(ch.check_timeout(last + timeout + EPS).is_some());
            }
            ChannelHealth::Stale => {
                assert!(!faults.is_empty());
                ch.on_feedback(&["1900", "0", "1"], last + timeout).unwrap();
                assert_eq!(ch.health(), ChannelHealth::Active);
            }
        }
    }

    #[test]
    fn test_safe_stop_is_last_command_after_timeout() {
        use std::thread;

        for trial in 0..500 {
            let sink = RecordingSink::new();
            let ch = Channel::with_policy(
                ChannelConfig::new(1, 100, 500, 19.0).with_timeout(T),
                StalePolicy::SafeStop,
                sink.clone(),
            )
            .unwrap();
            ch.on_feedback(&["0", "0", "1"], Stamp::ZERO).unwrap();

            thread::scope(|s| {
                s.spawn(|| while ch.on_command(&velocity(10.0)).is_ok() {});
                assert!(ch.check_timeout(Stamp::ZERO + T * 2).is_some());
            });

            let sent = sink.commands();
            let stop = sent
                .iter()
                .position(|c| c.mode == CommandMode::Stopped)
                .expect("safe stop was sent");
            assert!(
                sent[stop + 1..].is_empty(),
                "trial {}: {} command(s) forwarded after the safe stop",
                trial,
                sent.len() - stop - 1
            );
        }
    }
}
