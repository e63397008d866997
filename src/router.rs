// Routes commands, feedback frames and watchdog ticks to the channels of one controller

use tracing::{debug, warn};

use crate::channel::{Channel, CommandError, CommandSink, DecodeError, FeedbackSource};
use crate::config::{ConfigError, RuntimeConfig};
use crate::messages::{
    ChannelCommand, ChannelFault, ChannelStatus, EncoderCommand, FeedbackReport, RawFeedback,
    Stamp,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("No channel {0} on this controller")]
    UnknownChannel(u8),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Every channel of one controller, addressed by channel number
pub struct ChannelRouter<K> {
    channels: Vec<Channel<K>>,
}

impl<K: CommandSink + Clone> ChannelRouter<K> {
    /// Bring up every configured channel, each with its own handle on `sink`
    pub fn new(config: &RuntimeConfig, sink: K) -> Result<Self, ConfigError> {
        let mut channels: Vec<Channel<K>> = Vec::with_capacity(config.channels.len());
        for channel_config in &config.channels {
            let channel = channel_config.channel_num;
            if channels.iter().any(|c| c.channel_num() == channel) {
                return Err(ConfigError::DuplicateChannel { channel });
            }
            channels.push(Channel::with_policy(
                channel_config.clone(),
                config.stale_policy,
                sink.clone(),
            )?);
        }
        Ok(Self { channels })
    }
}

impl<K: CommandSink> ChannelRouter<K> {
    pub fn channels(&self) -> &[Channel<K>] {
        &self.channels
    }

    pub fn channel(&self, channel: u8) -> Option<&Channel<K>> {
        self.channels.iter().find(|c| c.channel_num() == channel)
    }

    fn route(&self, channel: u8) -> Result<&Channel<K>, RouteError> {
        self.channel(channel)
            .ok_or(RouteError::UnknownChannel(channel))
    }

    pub fn dispatch_command(&self, cmd: &ChannelCommand) -> Result<EncoderCommand, RouteError> {
        Ok(self.route(cmd.channel)?.on_command(cmd)?)
    }

    pub fn dispatch_feedback(
        &self,
        raw: &RawFeedback,
        now: Stamp,
    ) -> Result<FeedbackReport, RouteError> {
        Ok(self.route(raw.channel)?.on_feedback(raw.tokens.as_slice(), now)?)
    }

    /// Decode every pending frame; frames that fail are logged and dropped
    pub fn drain_feedback(
        &self,
        source: &mut impl FeedbackSource,
        now: Stamp,
    ) -> Vec<FeedbackReport> {
        let mut reports = Vec::new();
        while let Some(raw) = source.next_frame() {
            match self.dispatch_feedback(&raw, now) {
                Ok(report) => reports.push(report),
                Err(RouteError::UnknownChannel(channel)) => {
                    warn!("Feedback for unknown channel {}, dropping", channel);
                }
                Err(e) => debug!("Feedback frame dropped: {}", e),
            }
        }
        reports
    }

    /// Watchdog tick for every channel
    pub fn check_timeouts(&self, now: Stamp) -> Vec<ChannelFault> {
        self.channels
            .iter()
            .filter_map(|c| c.check_timeout(now))
            .collect()
    }

    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.channels.iter().map(Channel::status).collect()
    }
}
