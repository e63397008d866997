// Capabilities connecting channels to the controller process

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::warn;

use crate::messages::{EncoderCommand, RawFeedback};

/// Accepts encoder-unit commands for the controller (fire-and-forget)
pub trait CommandSink {
    fn send_command(&self, command: EncoderCommand);
}

/// Delivers demultiplexed feedback frames from the controller
pub trait FeedbackSource {
    /// Next pending frame, without blocking
    fn next_frame(&mut self) -> Option<RawFeedback>;
}

// The runtime drains this channel into the zenoh publisher each tick
impl CommandSink for mpsc::UnboundedSender<EncoderCommand> {
    fn send_command(&self, command: EncoderCommand) {
        if let Err(e) = self.send(command) {
            warn!("Dropping command for channel {}: sink closed", e.0.channel);
        }
    }
}

impl FeedbackSource for VecDeque<RawFeedback> {
    fn next_frame(&mut self) -> Option<RawFeedback> {
        self.pop_front()
    }
}

/// Sink that keeps every command it receives
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    commands: Arc<Mutex<Vec<EncoderCommand>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<EncoderCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<EncoderCommand> {
        std::mem::take(&mut *self.commands.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CommandSink for RecordingSink {
    fn send_command(&self, command: EncoderCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}
